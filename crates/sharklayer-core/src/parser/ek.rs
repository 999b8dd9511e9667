use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use super::raw::{self, RAW_SUFFIX};
use super::{Encoding, PacketParser, ParseError, ParserOptions};
use crate::layer::{EkLayer, FieldValue, Layer};
use crate::packet::{FrameInfo, Packet};

/// Decoder for `-T ek` output: one JSON document per line, optionally
/// interleaved with bulk-index headers.
#[derive(Debug, Clone, Default)]
pub struct EkParser {
    options: ParserOptions,
}

#[derive(Deserialize)]
struct EkDocument {
    #[serde(rename = "_index", default)]
    index: Option<Value>,
    #[serde(rename = "_source", default)]
    source: Option<EkSource>,
    #[serde(default)]
    layers: Option<Map<String, Value>>,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Deserialize)]
struct EkSource {
    #[serde(default)]
    layers: Option<Map<String, Value>>,
    #[serde(default)]
    timestamp: Option<Value>,
}

impl EkParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    fn decode_line(&self, unit: usize, line: &str) -> Result<Option<Packet>, ParseError> {
        let value: Value =
            serde_json::from_str(line).map_err(|source| ParseError::Json { unit, source })?;
        if is_index_header(&value) {
            return Ok(None);
        }
        let doc: EkDocument =
            serde_json::from_value(value).map_err(|source| ParseError::Json { unit, source })?;

        let (layers, timestamp) = match doc.source {
            Some(source) => (source.layers.or(doc.layers), source.timestamp.or(doc.timestamp)),
            None => (doc.layers, doc.timestamp),
        };
        let mut layers = layers.ok_or(ParseError::MissingLayers { unit })?;

        let mut packet = Packet::new(Encoding::Ek);
        match doc.index {
            Some(Value::String(index)) => packet.set_index(index),
            Some(Value::Null) | None => {}
            Some(other) => packet.set_index(other.to_string()),
        }

        if let Some(value) = layers.remove("frame_raw") {
            match raw::raw_hex(&value).map(raw::decode_hex) {
                Some(Ok(bytes)) => packet.set_raw(bytes),
                Some(Err(err)) => warn!(unit, error = %err, "undecodable frame_raw"),
                None => debug!(unit, "frame_raw without hex payload"),
            }
        }

        let mut ordered: Vec<(String, Value)> = layers.into_iter().collect();
        ordered.sort_by(|(a, _), (b, _)| (a != "frame", a).cmp(&(b != "frame", b)));

        for (name, mut value) in ordered {
            if let Some(base) = name.strip_suffix(RAW_SUFFIX) {
                match raw::raw_span(base, &value) {
                    Some(span) => packet.set_layer_offset(base, span),
                    None => debug!(unit, layer = base, "raw layer entry without span"),
                }
                continue;
            }
            let spans = raw::take_field_spans(&mut value);
            if self.options.include_raw {
                for span in spans {
                    let field = dotted_field_name(&name, &span.name);
                    packet.add_field_offset(&name, &field, span);
                }
            }
            let layer = EkLayer::new(name.as_str(), layer_fields(&name, value));
            if name == "frame" {
                packet.set_frame(frame_info(&layer));
            }
            packet.push_layer(layer);
        }

        if let Some(timestamp) = timestamp.as_ref() {
            backfill_timestamp(&mut packet, timestamp);
        }
        Ok(Some(packet))
    }
}

impl PacketParser for EkParser {
    fn encoding(&self) -> Encoding {
        Encoding::Ek
    }

    fn parse_units(&self, input: &[u8]) -> Vec<Result<Packet, ParseError>> {
        let text = String::from_utf8_lossy(input);
        let mut results = Vec::new();
        for (unit, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.decode_line(unit, line) {
                Ok(Some(packet)) => results.push(Ok(packet)),
                Ok(None) => {}
                Err(err) => results.push(Err(err)),
            }
        }
        debug!(units = results.len(), "decoded EK packets");
        results
    }
}

/// Bulk API action lines: a single `index` (or `create`) member.
fn is_index_header(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => {
            map.len() == 1 && (map.contains_key("index") || map.contains_key("create"))
        }
        None => false,
    }
}

/// `eth_eth_dst` (or `eth_dst`) becomes `eth.dst`, matching the JSON keys.
fn dotted_field_name(layer: &str, key: &str) -> String {
    let doubled = format!("{layer}_{layer}_");
    let single = format!("{layer}_");
    let rest = key
        .strip_prefix(&doubled)
        .or_else(|| key.strip_prefix(&single))
        .unwrap_or(key);
    format!("{layer}.{rest}")
}

fn layer_fields(name: &str, value: Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => match items.into_iter().find(Value::is_object) {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        },
        Value::Null => BTreeMap::new(),
        scalar => BTreeMap::from([(name.to_string(), scalar)]),
    }
}

fn frame_info(layer: &EkLayer) -> FrameInfo {
    // `time` also prefixes `time_epoch`; only a stored value counts.
    let text = |name: &str| match layer.get_field(name) {
        Some(FieldValue::MultiField(multi)) => {
            multi.value().map(ToString::to_string).unwrap_or_default()
        }
        Some(value) => value.to_string(),
        None => String::new(),
    };
    FrameInfo {
        number: text("number"),
        len: text("len"),
        cap_len: text("cap_len"),
        time: text("time"),
        time_epoch: text("time_epoch"),
    }
}

/// `timestamp` is epoch milliseconds (string or number) or RFC3339.
fn parse_document_time(value: &Value) -> Option<OffsetDateTime> {
    let text = raw::scalar_text(value)?;
    let text = text.trim();
    if let Ok(millis) = text.parse::<i128>() {
        let nanos = millis.checked_mul(1_000_000)?;
        return OffsetDateTime::from_unix_timestamp_nanos(nanos).ok();
    }
    OffsetDateTime::parse(text, &Rfc3339).ok()
}

fn backfill_timestamp(packet: &mut Packet, value: &Value) {
    let Some(time) = parse_document_time(value) else {
        debug!(timestamp = %value, "unrecognized document timestamp");
        return;
    };
    let frame = packet.frame_mut();
    if frame.time_epoch.is_empty() {
        let nanos = time.unix_timestamp_nanos();
        let secs = nanos.div_euclid(1_000_000_000);
        let millis = nanos.rem_euclid(1_000_000_000) / 1_000_000;
        frame.time_epoch = format!("{secs}.{millis:03}");
    }
    if frame.time.is_empty() {
        if let Ok(formatted) = time.format(&Rfc3339) {
            frame.time = formatted;
        }
    }
}
