use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::raw::{self, RAW_SUFFIX};
use super::{Encoding, PacketParser, ParseError, ParserOptions};
use crate::layer::JsonLayer;
use crate::packet::{FieldOffset, FrameInfo, Packet};

/// Decoder for `-T json` output: one array, one element per packet.
#[derive(Debug, Clone, Default)]
pub struct JsonParser {
    options: ParserOptions,
}

#[derive(Deserialize)]
struct RawPacket {
    #[serde(rename = "_index", default)]
    index: Option<Value>,
    #[serde(rename = "_source")]
    source: Option<RawSource>,
}

#[derive(Deserialize)]
struct RawSource {
    layers: Option<BTreeMap<String, Box<RawValue>>>,
}

impl JsonParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    fn decode_unit(&self, unit: usize, text: &str) -> Result<Packet, ParseError> {
        let raw: RawPacket =
            serde_json::from_str(text).map_err(|source| ParseError::Json { unit, source })?;
        let layers = raw
            .source
            .and_then(|source| source.layers)
            .ok_or(ParseError::MissingLayers { unit })?;

        let mut packet = Packet::new(Encoding::Json);
        if let Some(index) = raw.index.as_ref().and_then(index_text) {
            packet.set_index(index);
        }

        if let Some(blob) = layers.get("frame_raw") {
            let value = decode_layer(unit, "frame_raw", blob)?;
            match raw::raw_hex(&value).map(raw::decode_hex) {
                Some(Ok(bytes)) => packet.set_raw(bytes),
                Some(Err(err)) => warn!(unit, error = %err, "undecodable frame_raw"),
                None => debug!(unit, "frame_raw without hex payload"),
            }
        }

        if let Some(blob) = layers.get("frame") {
            let mut value = decode_layer(unit, "frame", blob)?;
            self.record_field_spans(&mut packet, "frame", &mut value);
            if let Value::Object(fields) = &value {
                packet.set_frame(frame_info(fields));
                for offset in frame_offsets(fields) {
                    let key = if offset.showname.is_empty() {
                        "frame.offset".to_string()
                    } else {
                        offset.showname.clone()
                    };
                    packet.add_field_offset("frame", &key, offset);
                }
            }
            packet.push_layer(JsonLayer::new("frame", value));
        }

        for (name, blob) in &layers {
            if name == "frame" || name == "frame_raw" {
                continue;
            }
            if let Some(base) = name.strip_suffix(RAW_SUFFIX) {
                let value = decode_layer(unit, name, blob)?;
                match raw::raw_span(base, &value) {
                    Some(span) => packet.set_layer_offset(base, span),
                    None => debug!(unit, layer = base, "raw layer entry without span"),
                }
                continue;
            }
            let mut value = decode_layer(unit, name, blob)?;
            self.record_field_spans(&mut packet, name, &mut value);
            packet.push_layer(JsonLayer::new(name.as_str(), value));
        }
        Ok(packet)
    }

    /// Strip `<field>_raw` members; keep their spans when raw detail is on.
    fn record_field_spans(&self, packet: &mut Packet, layer: &str, value: &mut Value) {
        let spans = raw::take_field_spans(value);
        if !self.options.include_raw {
            return;
        }
        for span in spans {
            let field = span.name.clone();
            packet.add_field_offset(layer, &field, span);
        }
    }
}

impl PacketParser for JsonParser {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn parse_units(&self, input: &[u8]) -> Vec<Result<Packet, ParseError>> {
        if input.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }
        let units: Vec<Box<RawValue>> = match serde_json::from_slice(input) {
            Ok(units) => units,
            Err(source) => return vec![Err(ParseError::Document { source })],
        };
        debug!(units = units.len(), "decoding JSON packets");
        units
            .iter()
            .enumerate()
            .map(|(unit, blob)| self.decode_unit(unit, blob.get()))
            .collect()
    }
}

fn decode_layer(unit: usize, name: &str, blob: &RawValue) -> Result<Value, ParseError> {
    serde_json::from_str(blob.get()).map_err(|err| ParseError::InvalidLayer {
        unit,
        layer: name.to_string(),
        message: err.to_string(),
    })
}

fn index_text(index: &Value) -> Option<String> {
    match index {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn frame_info(fields: &Map<String, Value>) -> FrameInfo {
    let text = |key: &str| fields.get(key).and_then(raw::scalar_text).unwrap_or_default();
    FrameInfo {
        number: text("frame.number"),
        len: text("frame.len"),
        cap_len: text("frame.cap_len"),
        time: text("frame.time"),
        time_epoch: text("frame.time_epoch"),
    }
}

/// `frame.offset` entries: `{pos, size, showname, value}` objects.
fn frame_offsets(fields: &Map<String, Value>) -> Vec<FieldOffset> {
    let entries: Vec<&Value> = match fields.get("frame.offset") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(entry @ Value::Object(_)) => vec![entry],
        _ => return Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let start = entry.get("pos").and_then(raw::as_usize)?;
            let length = entry.get("size").and_then(raw::as_usize)?;
            let showname = entry
                .get("showname")
                .and_then(raw::scalar_text)
                .unwrap_or_default();
            Some(FieldOffset::new(start, length, "frame.offset").with_showname(showname))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::JsonParser;
    use crate::layer::Layer;
    use crate::parser::{PacketParser, ParseError, ParserOptions};

    const TWO_PACKETS: &str = r#"[
      {"_index": "packets-2024-01-01", "_source": {"layers": {
        "udp": {"udp.srcport": "53", "udp.dstport": "40000"},
        "frame": {"frame.number": "1", "frame.len": "74", "frame.cap_len": "74",
                  "frame.time_epoch": "1700000000.000001000"},
        "eth": {"eth.src": "00:11:22:33:44:55"},
        "ip": {"ip.src": "10.0.0.1", "ip.dst": "10.0.0.2"}
      }}},
      {"_index": "packets-2024-01-01", "_source": {"layers": {
        "frame": {"frame.number": "2"}
      }}}
    ]"#;

    #[test]
    fn frame_first_then_sorted_layers() {
        let packets = JsonParser::default().parse_packets(TWO_PACKETS.as_bytes()).unwrap();
        assert_eq!(packets.len(), 2);
        let first = &packets[0];
        assert_eq!(first.layer_names(), ["frame", "eth", "ip", "udp"]);
        assert_eq!(first.frame().number, "1");
        assert_eq!(first.frame().len, "74");
        assert_eq!(first.index(), Some("packets-2024-01-01"));
        assert_eq!(first.transport_layer(), "udp");
        assert_eq!(packets[1].frame().number, "2");
    }

    #[test]
    fn frame_raw_fills_buffer_and_spans() {
        let input = br#"[{"_source": {"layers": {
            "frame_raw": ["00:11:22:33:44:55:66:77", 0, 8, 0, 1],
            "frame": {"frame.number": "1", "frame.len": "8"},
            "eth_raw": ["0011223344556677", 0, 8, 0, 1],
            "eth": {"eth.dst": "00:11:22:33:44:55", "eth.dst_raw": ["001122334455", 0, 6, 0, 29]}
        }}}]"#;
        let parser = JsonParser::new(ParserOptions::default().with_include_raw(true));
        let packets = parser.parse_packets(input).unwrap();
        let packet = &packets[0];
        assert_eq!(packet.raw_packet().map(<[u8]>::len), Some(8));
        assert_eq!(packet.layer_raw_bytes("eth").map(<[u8]>::len), Some(8));
        assert_eq!(
            packet.field_raw_bytes("eth", "dst"),
            Some(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55][..])
        );
        assert_eq!(packet.layer_names(), ["frame", "eth"]);
        let eth = packet.get_layer("eth").unwrap();
        assert!(!eth.has_field("dst_raw"));
    }

    #[test]
    fn frame_raw_object_form() {
        let input = br#"[{"_source": {"layers": {
            "frame_raw": {"value": "deadbeef"},
            "frame": {"frame.number": "1"}
        }}}]"#;
        let packets = JsonParser::default().parse_packets(input).unwrap();
        assert_eq!(packets[0].raw_packet(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
    }

    #[test]
    fn frame_offset_entries_become_offsets() {
        let input = br#"[{"_source": {"layers": {
            "frame_raw": "000102030405",
            "frame": {"frame.number": "1",
                      "frame.offset": [{"pos": "2", "size": "3", "showname": "Payload", "value": ""}]}
        }}}]"#;
        let packets = JsonParser::default().parse_packets(input).unwrap();
        assert_eq!(
            packets[0].field_raw_bytes("frame", "Payload"),
            Some(&[2u8, 3, 4][..])
        );
    }

    #[test]
    fn missing_frame_yields_empty_metadata() {
        let input = br#"[{"_source": {"layers": {"ip": {"ip.src": "10.0.0.1"}}}}]"#;
        let packets = JsonParser::default().parse_packets(input).unwrap();
        assert!(packets[0].frame().is_empty());
        assert!(packets[0].raw_packet().is_none());
        assert!(packets[0].sniff_time().is_err());
    }

    #[test]
    fn duplicate_layers_stay_reachable() {
        let input = br#"[{"_source": {"layers": {
            "ip": [{"ip.src": "10.0.0.1"}, {"ip.src": "192.168.0.1"}, {"ip.src": "172.16.0.1"}]
        }}}]"#;
        let packets = JsonParser::default().parse_packets(input).unwrap();
        let ip = packets[0].get_layer("ip").unwrap();
        assert_eq!(ip.get_str("src").as_deref(), Some("10.0.0.1"));
        assert_eq!(ip.as_json().unwrap().duplicates().len(), 2);
    }

    #[test]
    fn malformed_unit_does_not_poison_neighbours() {
        let input = br#"[
            {"_source": {"layers": {"frame": {"frame.number": "1"}}}},
            {"_source": "not an object"},
            {"_source": {"layers": {"frame": {"frame.number": "3"}}}}
        ]"#;
        let results = JsonParser::default().parse_units(input);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ParseError::Json { unit: 1, .. })));
        assert_eq!(results[2].as_ref().unwrap().frame().number, "3");
        assert!(JsonParser::default().parse_packets(input).is_err());
    }

    #[test]
    fn non_array_document_is_rejected() {
        let results = JsonParser::default().parse_units(br#"{"_source": {}}"#);
        assert!(matches!(results.as_slice(), [Err(ParseError::Document { .. })]));
        assert!(JsonParser::default().parse_units(b"  \n").is_empty());
    }
}
