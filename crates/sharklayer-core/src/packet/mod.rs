//! Parsed packets: ordered layers, frame metadata and optional raw bytes.

pub mod error;
pub mod summary;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::layer::{Layer, PacketLayer};
use crate::parser::Encoding;

pub use error::PacketError;
pub use summary::PacketSummary;

/// Layers that count as transport, in preference order.
pub const TRANSPORT_LAYERS: [&str; 4] = ["tcp", "udp", "sctp", "dccp"];

/// Frame metadata flattened out of the `frame` layer, kept as emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub number: String,
    pub len: String,
    pub cap_len: String,
    pub time: String,
    pub time_epoch: String,
}

impl FrameInfo {
    pub fn is_empty(&self) -> bool {
        self.number.is_empty()
            && self.len.is_empty()
            && self.cap_len.is_empty()
            && self.time.is_empty()
            && self.time_epoch.is_empty()
    }
}

/// Byte span of a field or layer within the raw frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOffset {
    pub start: usize,
    pub length: usize,
    pub name: String,
    pub showname: String,
}

impl FieldOffset {
    pub fn new(start: usize, length: usize, name: impl Into<String>) -> Self {
        Self {
            start,
            length,
            name: name.into(),
            showname: String::new(),
        }
    }

    pub fn with_showname(mut self, showname: impl Into<String>) -> Self {
        self.showname = showname.into();
        self
    }

    /// The covered bytes, or `None` for an empty or out-of-range span.
    pub fn slice<'a>(&self, raw: &'a [u8]) -> Option<&'a [u8]> {
        if self.length == 0 {
            return None;
        }
        let end = self.start.checked_add(self.length)?;
        raw.get(self.start..end)
    }
}

/// One dissected packet.
///
/// Layers are immutable once the parser hands the packet out, so a packet
/// can be shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Packet {
    encoding: Encoding,
    index: Option<String>,
    frame: FrameInfo,
    layers: Vec<PacketLayer>,
    raw: Option<Vec<u8>>,
    layer_offsets: HashMap<String, FieldOffset>,
    field_offsets: HashMap<(String, String), FieldOffset>,
}

impl Packet {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            index: None,
            frame: FrameInfo::default(),
            layers: Vec::new(),
            raw: None,
            layer_offsets: HashMap::new(),
            field_offsets: HashMap::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The document's `_index` member, when present.
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn frame(&self) -> &FrameInfo {
        &self.frame
    }

    pub fn layers(&self) -> &[PacketLayer] {
        &self.layers
    }

    pub fn set_index(&mut self, index: impl Into<String>) {
        self.index = Some(index.into());
    }

    pub fn set_frame(&mut self, frame: FrameInfo) {
        self.frame = frame;
    }

    pub(crate) fn frame_mut(&mut self) -> &mut FrameInfo {
        &mut self.frame
    }

    pub fn push_layer(&mut self, layer: impl Into<PacketLayer>) {
        self.layers.push(layer.into());
    }

    /// Move the `frame` layer to the front, keeping the others in order.
    pub(crate) fn promote_frame(&mut self) {
        if let Some(idx) = self
            .layers
            .iter()
            .position(|layer| layer.layer_name() == "frame")
        {
            let frame = self.layers.remove(idx);
            self.layers.insert(0, frame);
        }
    }

    pub fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = Some(raw);
    }

    pub fn set_layer_offset(&mut self, layer: &str, offset: FieldOffset) {
        self.layer_offsets.insert(layer.to_ascii_lowercase(), offset);
    }

    pub fn add_field_offset(&mut self, layer: &str, field: &str, offset: FieldOffset) {
        self.field_offsets.insert(
            (layer.to_ascii_lowercase(), field.to_ascii_lowercase()),
            offset,
        );
    }

    pub fn layer_offset(&self, layer: &str) -> Option<&FieldOffset> {
        self.layer_offsets.get(&layer.to_ascii_lowercase())
    }

    /// Offset of a field, by full (`ip.src`) or short (`src`) name.
    pub fn field_offset(&self, layer: &str, field: &str) -> Option<&FieldOffset> {
        let layer = layer.to_ascii_lowercase();
        let field = field.to_ascii_lowercase();
        self.field_offsets
            .get(&(layer.clone(), field.clone()))
            .or_else(|| {
                let qualified = format!("{layer}.{field}");
                self.field_offsets.get(&(layer, qualified))
            })
    }

    /// First layer with this name, case-insensitive.
    pub fn get_layer(&self, name: &str) -> Option<&PacketLayer> {
        self.layers
            .iter()
            .find(|layer| layer.layer_name().eq_ignore_ascii_case(name))
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.get_layer(name).is_some()
    }

    pub fn layer_at(&self, index: usize) -> Option<&PacketLayer> {
        self.layers.get(index)
    }

    /// Every layer with this name, in packet order.
    pub fn layers_named(&self, name: &str) -> Vec<&PacketLayer> {
        self.layers
            .iter()
            .filter(|layer| layer.layer_name().eq_ignore_ascii_case(name))
            .collect()
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.layer_name()).collect()
    }

    /// Name of the last layer, or `""` for an empty packet.
    pub fn highest_layer(&self) -> &str {
        self.layers
            .last()
            .map(|layer| layer.layer_name())
            .unwrap_or("")
    }

    /// First of tcp/udp/sctp/dccp present, or `""`.
    pub fn transport_layer(&self) -> &str {
        TRANSPORT_LAYERS
            .iter()
            .find(|name| self.has_layer(name))
            .copied()
            .unwrap_or("")
    }

    /// Capture time from the frame's epoch value.
    pub fn sniff_time(&self) -> Result<OffsetDateTime, PacketError> {
        let value = self.frame.time_epoch.trim();
        if value.is_empty() {
            return Err(PacketError::SniffTimeUnavailable);
        }
        parse_epoch(value)
            .or_else(|| OffsetDateTime::parse(value, &Rfc3339).ok())
            .ok_or_else(|| PacketError::InvalidSniffTime {
                value: value.to_string(),
            })
    }

    /// Capture time as fractional seconds since the epoch.
    pub fn sniff_timestamp(&self) -> Result<f64, PacketError> {
        let time = self.sniff_time()?;
        Ok(time.unix_timestamp_nanos() as f64 / 1e9)
    }

    pub fn raw_packet(&self) -> Option<&[u8]> {
        self.raw.as_deref().filter(|raw| !raw.is_empty())
    }

    pub fn layer_raw_bytes(&self, layer: &str) -> Option<&[u8]> {
        let raw = self.raw_packet()?;
        self.layer_offset(layer)?.slice(raw)
    }

    pub fn field_raw_bytes(&self, layer: &str, field: &str) -> Option<&[u8]> {
        let raw = self.raw_packet()?;
        self.field_offset(layer, field)?.slice(raw)
    }
}

/// Parse `secs[.fraction]` without going through `f64`.
fn parse_epoch(value: &str) -> Option<OffsetDateTime> {
    let (secs, frac) = value.split_once('.').unwrap_or((value, ""));
    let negative = secs.starts_with('-');
    let secs: i128 = secs.parse().ok()?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut digits: String = frac.chars().take(9).collect();
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: i128 = digits.parse().ok()?;
    let whole = secs.checked_mul(1_000_000_000)?;
    let total = if negative {
        whole.checked_sub(nanos)?
    } else {
        whole.checked_add(nanos)?
    };
    OffsetDateTime::from_unix_timestamp_nanos(total).ok()
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let length = if self.frame.len.is_empty() {
            "?"
        } else {
            self.frame.len.as_str()
        };
        writeln!(f, "Packet (Length: {length})")?;
        for layer in &self.layers {
            write!(f, "{layer}")?;
            if layer
                .layer_name()
                .eq_ignore_ascii_case(crate::layer::DATA_LAYER_NAME)
            {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{FieldOffset, FrameInfo, Packet, PacketError};
    use crate::layer::{EkLayer, JsonLayer};
    use crate::parser::Encoding;

    fn packet_with(layers: &[&str]) -> Packet {
        let mut packet = Packet::new(Encoding::Json);
        for name in layers {
            packet.push_layer(JsonLayer::new(*name, json!({})));
        }
        packet
    }

    #[test]
    fn highest_and_transport_layers() {
        let packet = packet_with(&["frame", "eth", "ip", "udp", "dns"]);
        assert_eq!(packet.highest_layer(), "dns");
        assert_eq!(packet.transport_layer(), "udp");
        assert_eq!(packet.layer_names(), ["frame", "eth", "ip", "udp", "dns"]);

        let empty = Packet::new(Encoding::Xml);
        assert_eq!(empty.highest_layer(), "");
        assert_eq!(empty.transport_layer(), "");
    }

    #[test]
    fn layer_lookup_is_case_insensitive() {
        let packet = packet_with(&["frame", "ip", "ip", "tcp"]);
        assert!(packet.has_layer("TCP"));
        assert_eq!(packet.layers_named("ip").len(), 2);
        assert!(packet.layer_at(9).is_none());
    }

    #[test]
    fn promote_frame_moves_it_first() {
        let mut packet = Packet::new(Encoding::Ek);
        packet.push_layer(EkLayer::new("eth", BTreeMap::new()));
        packet.push_layer(EkLayer::new("frame", BTreeMap::new()));
        packet.promote_frame();
        assert_eq!(packet.layer_names(), ["frame", "eth"]);
    }

    #[test]
    fn sniff_time_keeps_nanoseconds() {
        let mut packet = Packet::new(Encoding::Json);
        packet.set_frame(FrameInfo {
            time_epoch: "1700000000.123456789".into(),
            ..FrameInfo::default()
        });
        let time = packet.sniff_time().unwrap();
        assert_eq!(time.unix_timestamp(), 1_700_000_000);
        assert_eq!(time.nanosecond(), 123_456_789);
        assert!((packet.sniff_timestamp().unwrap() - 1_700_000_000.123_456_8).abs() < 1e-6);
    }

    #[test]
    fn sniff_time_accepts_rfc3339_and_reports_errors() {
        let mut packet = Packet::new(Encoding::Json);
        assert_eq!(packet.sniff_time(), Err(PacketError::SniffTimeUnavailable));
        packet.set_frame(FrameInfo {
            time_epoch: "2023-11-14T22:13:20Z".into(),
            ..FrameInfo::default()
        });
        assert_eq!(packet.sniff_time().unwrap().unix_timestamp(), 1_700_000_000);
        packet.set_frame(FrameInfo {
            time_epoch: "yesterday".into(),
            ..FrameInfo::default()
        });
        assert!(matches!(
            packet.sniff_time(),
            Err(PacketError::InvalidSniffTime { .. })
        ));
    }

    #[test]
    fn oversized_epoch_is_an_error() {
        let mut packet = Packet::new(Encoding::Json);
        for epoch in [
            "99999999999999999999999999999999999",
            "-99999999999999999999999999999999999.5",
            "999999999999999999999999999999999999999999",
        ] {
            packet.set_frame(FrameInfo {
                time_epoch: epoch.into(),
                ..FrameInfo::default()
            });
            assert!(
                matches!(packet.sniff_time(), Err(PacketError::InvalidSniffTime { .. })),
                "{epoch}"
            );
            assert!(packet.sniff_timestamp().is_err());
        }
    }

    #[test]
    fn raw_slices_respect_bounds() {
        let mut packet = packet_with(&["frame", "ip"]);
        packet.set_raw((0u8..20).collect());
        packet.set_layer_offset("ip", FieldOffset::new(14, 6, "ip"));
        packet.add_field_offset("ip", "ip.src", FieldOffset::new(12, 4, "ip.src"));
        packet.add_field_offset("ip", "ip.dst", FieldOffset::new(18, 4, "ip.dst"));
        packet.add_field_offset("ip", "ip.len", FieldOffset::new(2, 0, "ip.len"));

        assert_eq!(packet.layer_raw_bytes("IP"), Some(&[14u8, 15, 16, 17, 18, 19][..]));
        assert_eq!(packet.field_raw_bytes("ip", "src"), Some(&[12u8, 13, 14, 15][..]));
        assert_eq!(packet.field_raw_bytes("ip", "ip.src"), Some(&[12u8, 13, 14, 15][..]));
        assert_eq!(packet.field_raw_bytes("ip", "dst"), None);
        assert_eq!(packet.field_raw_bytes("ip", "len"), None);
        assert_eq!(packet.field_raw_bytes("tcp", "srcport"), None);
    }

    #[test]
    fn no_raw_buffer_means_no_slices() {
        let mut packet = packet_with(&["frame"]);
        packet.set_layer_offset("frame", FieldOffset::new(0, 4, "frame"));
        assert_eq!(packet.raw_packet(), None);
        assert_eq!(packet.layer_raw_bytes("frame"), None);
    }

    #[test]
    fn display_lists_layers() {
        let mut packet = Packet::new(Encoding::Json);
        packet.set_frame(FrameInfo {
            len: "60".into(),
            ..FrameInfo::default()
        });
        packet.push_layer(JsonLayer::new("ip", json!({"ip.src": "10.0.0.1"})));
        let text = packet.to_string();
        assert!(text.starts_with("Packet (Length: 60)\n"));
        assert!(text.contains("Layer IP:\n\tsrc: 10.0.0.1\n"));
    }

    #[test]
    fn data_layer_prints_as_marker() {
        let mut packet = Packet::new(Encoding::Json);
        packet.push_layer(JsonLayer::new("data", json!({"data.data": "0001"})));
        packet.push_layer(JsonLayer::new("ip", json!({"ip.src": "10.0.0.1"})));
        let text = packet.to_string();
        assert!(text.contains("DATA\nLayer IP:"));
        assert!(!text.contains("Layer DATA:"));
    }
}
