//! Recursive-descent PDML decoder.
//!
//! `<packet>` holds `<proto>` elements, each holding (possibly nested)
//! `<field>` elements. Two pseudo-protocols get special handling:
//! `geninfo` only feeds frame metadata, and `fake-field-wrapper` lends its
//! fields to whichever earlier layer they belong to.

mod reader;

use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use super::{Encoding, PacketParser, ParseError, ParserOptions};
use crate::field::Field;
use crate::layer::{Layer, XmlLayer};
use crate::packet::{FieldOffset, FrameInfo, Packet};
use reader::{ElementAttrs, PdmlReader, pdml_reader};

const GENINFO: &str = "geninfo";
const FAKE_FIELD_WRAPPER: &str = "fake-field-wrapper";

/// Decoder for PDML (`-T pdml`) documents.
#[derive(Debug, Clone, Default)]
pub struct XmlParser {
    options: ParserOptions,
}

impl XmlParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    fn parse_packet(
        &self,
        reader: &mut PdmlReader<'_>,
        attrs: ElementAttrs,
        unit: usize,
    ) -> Result<Packet, ParseError> {
        let mut packet = Packet::new(Encoding::Xml);
        let mut geninfo = None;
        let mut layers: Vec<XmlLayer> = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match read(reader, &mut buf, unit)? {
                Event::Start(tag) => match tag.name().as_ref() {
                    b"proto" => {
                        let attrs = element_attrs(&tag, unit)?;
                        let fields = self.parse_proto_fields(reader, unit)?;
                        self.place_proto(attrs, fields, &mut layers, &mut geninfo);
                    }
                    b"field" => {
                        let attrs = element_attrs(&tag, unit)?;
                        let field = self.parse_field(reader, attrs, unit)?;
                        attach_loose_field(&mut layers, field);
                    }
                    _ => skip(reader, &tag, unit)?,
                },
                Event::Empty(tag) => match tag.name().as_ref() {
                    b"proto" => {
                        let attrs = element_attrs(&tag, unit)?;
                        self.place_proto(attrs, Vec::new(), &mut layers, &mut geninfo);
                    }
                    b"field" => {
                        let attrs = element_attrs(&tag, unit)?;
                        let field = attrs.into_field(self.options.include_raw);
                        attach_loose_field(&mut layers, field);
                    }
                    _ => {}
                },
                Event::End(tag) if tag.name().as_ref() == b"packet" => break,
                Event::Eof => return Err(ParseError::UnexpectedEof { unit }),
                _ => {}
            }
        }

        let frame = layers
            .iter()
            .find(|layer| layer.layer_name() == "frame")
            .map(frame_info)
            .unwrap_or_default();
        packet.set_frame(frame);
        if let Some(info) = &geninfo {
            backfill_from_geninfo(&mut packet, info);
        }
        if let Some(num) = attrs.num.filter(|num| !num.is_empty()) {
            packet.frame_mut().number = num;
        }

        if self.options.include_raw {
            for layer in &layers {
                record_offsets(&mut packet, layer);
            }
        }
        for layer in layers {
            packet.push_layer(layer);
        }
        packet.promote_frame();
        Ok(packet)
    }

    fn new_layer(&self, attrs: ElementAttrs) -> XmlLayer {
        let mut layer = XmlLayer::new(attrs.name)
            .with_showname(attrs.showname)
            .with_raw_mode(self.options.raw_mode);
        if self.options.include_raw {
            if let (Some(pos), Some(size)) = (attrs.pos, attrs.size) {
                layer = layer.with_span(pos, size);
            }
        }
        layer
    }

    /// Top-level fields of a `<proto>`; the start tag has already been consumed.
    fn parse_proto_fields(
        &self,
        reader: &mut PdmlReader<'_>,
        unit: usize,
    ) -> Result<Vec<Field>, ParseError> {
        let mut fields = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match read(reader, &mut buf, unit)? {
                Event::Start(tag) if tag.name().as_ref() == b"field" => {
                    let attrs = element_attrs(&tag, unit)?;
                    fields.push(self.parse_field(reader, attrs, unit)?);
                }
                Event::Empty(tag) if tag.name().as_ref() == b"field" => {
                    let attrs = element_attrs(&tag, unit)?;
                    fields.push(attrs.into_field(self.options.include_raw));
                }
                Event::Start(tag) => {
                    debug!(unit, "skipping element nested in proto");
                    skip(reader, &tag, unit)?;
                }
                Event::End(tag) if tag.name().as_ref() == b"proto" => return Ok(fields),
                Event::Eof => return Err(ParseError::UnexpectedEof { unit }),
                _ => {}
            }
        }
    }

    /// A `<field>` with children; the start tag has already been consumed.
    fn parse_field(
        &self,
        reader: &mut PdmlReader<'_>,
        attrs: ElementAttrs,
        unit: usize,
    ) -> Result<Field, ParseError> {
        let mut field = attrs.into_field(self.options.include_raw);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match read(reader, &mut buf, unit)? {
                Event::Start(tag) if tag.name().as_ref() == b"field" => {
                    let attrs = element_attrs(&tag, unit)?;
                    let child = self.parse_field(reader, attrs, unit)?;
                    field.children.push(child);
                }
                Event::Empty(tag) if tag.name().as_ref() == b"field" => {
                    let attrs = element_attrs(&tag, unit)?;
                    field
                        .children
                        .push(attrs.into_field(self.options.include_raw));
                }
                Event::Start(tag) => skip(reader, &tag, unit)?,
                Event::End(tag) if tag.name().as_ref() == b"field" => return Ok(field),
                Event::Eof => return Err(ParseError::UnexpectedEof { unit }),
                _ => {}
            }
        }
    }

    fn place_proto(
        &self,
        attrs: ElementAttrs,
        fields: Vec<Field>,
        layers: &mut Vec<XmlLayer>,
        geninfo: &mut Option<XmlLayer>,
    ) {
        if attrs.name == FAKE_FIELD_WRAPPER {
            for field in fields {
                attach_loose_field(layers, field);
            }
            return;
        }
        let is_geninfo = attrs.name == GENINFO;
        let mut layer = self.new_layer(attrs);
        for field in fields {
            layer.add_field(field);
        }
        if is_geninfo {
            *geninfo = Some(layer);
        } else {
            layers.push(layer);
        }
    }
}

impl PacketParser for XmlParser {
    fn encoding(&self) -> Encoding {
        Encoding::Xml
    }

    fn parse_units(&self, input: &[u8]) -> Vec<Result<Packet, ParseError>> {
        let mut reader = pdml_reader(input);
        let mut results = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let unit = results.len();
            let event = match read(&mut reader, &mut buf, unit) {
                Ok(event) => event,
                Err(err) => {
                    results.push(Err(err));
                    break;
                }
            };
            match event {
                Event::Start(tag) if tag.name().as_ref() == b"packet" => {
                    let parsed = element_attrs(&tag, unit)
                        .and_then(|attrs| self.parse_packet(&mut reader, attrs, unit));
                    let failed = parsed.is_err();
                    results.push(parsed);
                    if failed {
                        // The reader position is unknown after a failure.
                        break;
                    }
                }
                Event::Empty(tag) if tag.name().as_ref() == b"packet" => {
                    let mut packet = Packet::new(Encoding::Xml);
                    if let Ok(ElementAttrs { num: Some(num), .. }) = ElementAttrs::read(&tag) {
                        packet.set_frame(FrameInfo {
                            number: num,
                            ..FrameInfo::default()
                        });
                    }
                    results.push(Ok(packet));
                }
                Event::Eof => break,
                _ => {}
            }
        }
        debug!(units = results.len(), "decoded PDML packets");
        results
    }
}

fn read<'b>(
    reader: &mut PdmlReader<'_>,
    buf: &'b mut Vec<u8>,
    unit: usize,
) -> Result<Event<'b>, ParseError> {
    reader.read_event_into(buf).map_err(|err| ParseError::Xml {
        unit,
        message: format!("{err} at byte {}", reader.buffer_position()),
    })
}

fn element_attrs(tag: &BytesStart<'_>, unit: usize) -> Result<ElementAttrs, ParseError> {
    ElementAttrs::read(tag).map_err(|message| ParseError::Xml { unit, message })
}

fn skip(reader: &mut PdmlReader<'_>, tag: &BytesStart<'_>, unit: usize) -> Result<(), ParseError> {
    let end = tag.to_end().into_owned();
    let mut skipped = Vec::new();
    reader
        .read_to_end_into(end.name(), &mut skipped)
        .map(|_| ())
        .map_err(|err| ParseError::Xml {
            unit,
            message: err.to_string(),
        })
}

/// Fields not nested under a `<proto>` join the latest layer owning their prefix.
fn attach_loose_field(layers: &mut [XmlLayer], field: Field) {
    let prefix = field.name.split('.').next().unwrap_or_default().to_string();
    match layers
        .iter_mut()
        .rev()
        .find(|layer| layer.layer_name() == prefix)
    {
        Some(layer) => layer.add_field(field),
        None => debug!(field = %field.name, "dropping field without owning layer"),
    }
}

fn frame_info(layer: &XmlLayer) -> FrameInfo {
    let show = |name: &str| {
        layer
            .container(name)
            .map(|container| container.default_value().to_string())
            .unwrap_or_default()
    };
    FrameInfo {
        number: show("frame.number"),
        len: show("frame.len"),
        cap_len: show("frame.cap_len"),
        time: show("frame.time"),
        time_epoch: show("frame.time_epoch"),
    }
}

fn backfill_from_geninfo(packet: &mut Packet, geninfo: &XmlLayer) {
    let show = |name: &str| {
        geninfo
            .container(name)
            .and_then(|container| container.main_field())
    };
    let frame = packet.frame_mut();
    let fill = |slot: &mut String, value: Option<String>| {
        if slot.is_empty() {
            if let Some(value) = value.filter(|value| !value.is_empty()) {
                *slot = value;
            }
        }
    };
    fill(&mut frame.number, show("num").map(|f| f.default_value().to_string()));
    fill(&mut frame.len, show("len").map(|f| f.default_value().to_string()));
    fill(&mut frame.cap_len, show("caplen").map(|f| f.default_value().to_string()));
    // `timestamp` carries the epoch in `value` and a date in `show`.
    fill(&mut frame.time_epoch, show("timestamp").map(|f| f.raw_value.clone()));
    fill(&mut frame.time, show("timestamp").map(|f| f.show.clone()));
}

fn record_offsets(packet: &mut Packet, layer: &XmlLayer) {
    let name = layer.layer_name();
    if let Some((pos, size)) = layer.span() {
        packet.set_layer_offset(name, FieldOffset::new(pos, size, name));
    }
    for field in layer.all_fields() {
        if let (Some(pos), Some(size)) = (field.pos, field.size) {
            if size > 0 {
                let offset = FieldOffset::new(pos, size, field.name.as_str())
                    .with_showname(field.showname.as_str());
                packet.add_field_offset(name, &field.name, offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::XmlParser;
    use crate::layer::Layer;
    use crate::parser::{PacketParser, ParseError, ParserOptions};

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<pdml version="0" creator="wireshark/4.2.0">
<packet>
  <proto name="geninfo" pos="0" showname="General information" size="60">
    <field name="num" pos="0" show="1" showname="Number" value="1" size="60"/>
    <field name="len" pos="0" show="60" showname="Frame Length" value="3c" size="60"/>
    <field name="caplen" pos="0" show="60" showname="Captured Length" value="3c" size="60"/>
    <field name="timestamp" pos="0" show="Nov 14, 2023 22:13:20.000000000 UTC" value="1700000000.000000000" size="60"/>
  </proto>
  <proto name="frame" showname="Frame 1: 60 bytes" size="60" pos="0">
    <field name="frame.number" show="1" size="0" pos="0"/>
  </proto>
  <proto name="eth" showname="Ethernet II" size="14" pos="0">
    <field name="eth.dst" showname="Destination: 00:11:22:33:44:55" size="6" pos="0" show="00:11:22:33:44:55" value="001122334455"/>
  </proto>
  <proto name="ip" showname="Internet Protocol Version 4" size="20" pos="14">
    <field name="ip.flags" showname="Flags: 0x02" size="1" pos="20" show="0x02" value="40">
      <field name="ip.flags.df" showname="Don't fragment: Set" size="1" pos="20" show="1" value="1"/>
    </field>
    <field name="ip.src" showname="Source: 10.0.0.1" size="4" pos="26" show="10.0.0.1" value="0a000001"/>
    <field name="ip.addr" show="10.0.0.1" size="4" pos="26" value="0a000001" hide="yes"/>
    <field name="ip.dst" showname="Destination: 10.0.0.2" size="4" pos="30" show="10.0.0.2" value="0a000002"/>
    <field name="ip.addr" show="10.0.0.2" size="4" pos="30" value="0a000002" hide="yes"/>
  </proto>
  <proto name="fake-field-wrapper">
    <field name="ip.ttl" show="64" size="1" pos="22" value="40"/>
    <field name="nobody.owns" show="x"/>
  </proto>
</packet>
<packet>
  <proto name="frame" showname="Frame 2" size="42" pos="0">
    <field name="frame.number" show="2" size="0" pos="0"/>
    <field name="frame.len" show="42" size="0" pos="0"/>
    <field name="frame.time_epoch" show="1700000001.500000000" size="0" pos="0"/>
  </proto>
  <proto name="arp" showname="Address Resolution Protocol" size="28" pos="14"/>
</packet>
</pdml>
"#;

    #[test]
    fn decodes_layers_in_document_order() {
        let packets = XmlParser::default().parse_packets(SAMPLE.as_bytes()).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].layer_names(), ["frame", "eth", "ip"]);
        assert_eq!(packets[1].layer_names(), ["frame", "arp"]);
        assert_eq!(packets[1].highest_layer(), "arp");
        let ip = packets[0].get_layer("ip").unwrap();
        assert_eq!(ip.get_str("src").as_deref(), Some("10.0.0.1"));
        assert_eq!(ip.get_str("flags_df").as_deref(), Some("1"));
        let addr = ip.get_field("addr").unwrap();
        assert_eq!(addr.as_container().unwrap().len(), 2);
    }

    #[test]
    fn geninfo_backfills_frame_metadata() {
        let packets = XmlParser::default().parse_packets(SAMPLE.as_bytes()).unwrap();
        let frame = packets[0].frame();
        assert_eq!(frame.number, "1");
        assert_eq!(frame.len, "60");
        assert_eq!(frame.cap_len, "60");
        assert_eq!(frame.time_epoch, "1700000000.000000000");
        assert!(!packets[0].has_layer("geninfo"));
        assert_eq!(packets[1].frame().len, "42");
        assert!(packets[1].sniff_time().is_ok());
    }

    #[test]
    fn fake_wrapper_fields_join_their_layer() {
        let packets = XmlParser::default().parse_packets(SAMPLE.as_bytes()).unwrap();
        let ip = packets[0].get_layer("ip").unwrap();
        assert_eq!(ip.get_str("ttl").as_deref(), Some("64"));
        assert!(!packets[0].has_layer("fake-field-wrapper"));
        assert!(!packets[0].has_layer("nobody"));
    }

    #[test]
    fn include_raw_records_offsets() {
        let parser = XmlParser::new(ParserOptions::default().with_include_raw(true));
        let packets = parser.parse_packets(SAMPLE.as_bytes()).unwrap();
        let offset = packets[0].field_offset("ip", "ip.src").unwrap();
        assert_eq!((offset.start, offset.length), (26, 4));
        assert_eq!(packets[0].layer_offset("ip").map(|o| o.start), Some(14));
        // Zero-sized fields are not worth an offset.
        assert!(packets[0].field_offset("frame", "frame.number").is_none());

        let plain = XmlParser::default().parse_packets(SAMPLE.as_bytes()).unwrap();
        assert!(plain[0].field_offset("ip", "ip.src").is_none());
    }

    #[test]
    fn raw_mode_lookups_return_value_text() {
        let parser = XmlParser::new(ParserOptions::default().with_raw_mode(true));
        let packets = parser.parse_packets(SAMPLE.as_bytes()).unwrap();
        let ip = packets[0].get_layer("ip").unwrap();
        assert_eq!(ip.get_str("src").as_deref(), Some("0a000001"));
    }

    #[test]
    fn truncated_document_keeps_earlier_packets() {
        let cut = SAMPLE.find("<proto name=\"arp\"").unwrap();
        let results = XmlParser::default().parse_units(&SAMPLE.as_bytes()[..cut]);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ParseError::UnexpectedEof { unit: 1 } | ParseError::Xml { unit: 1, .. })
        ));
    }

    #[test]
    fn packet_num_attribute_wins() {
        let input = br#"<pdml><packet num="7"><proto name="frame"><field name="frame.number" show="1"/></proto></packet><packet num="8"/></pdml>"#;
        let packets = XmlParser::default().parse_packets(input).unwrap();
        assert_eq!(packets[0].frame().number, "7");
        assert_eq!(packets[1].frame().number, "8");
        assert!(packets[1].layers().is_empty());
    }
}
