//! Helpers for `_raw` entries and loosely typed scalar values.
//!
//! With `-x`, the JSON and EK encodings add `<name>_raw` members next to
//! layers and fields: either a hex string or `[hex, pos, len, bitmask, type]`.

use serde_json::{Map, Value};

use crate::packet::FieldOffset;

pub(crate) const RAW_SUFFIX: &str = "_raw";

/// Hex payload of a raw entry: a string, `[hex, ..]`, or `{"value": hex}`.
pub(crate) fn raw_hex(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text),
        Value::Array(items) => items.first().and_then(raw_hex),
        Value::Object(map) => map.get("value").and_then(raw_hex),
        _ => None,
    }
}

/// Decode hex, tolerating `:` separators and whitespace.
pub(crate) fn decode_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    hex::decode(cleaned)
}

/// Byte span of a `[hex, pos, len, ..]` raw entry.
pub(crate) fn raw_span(name: &str, value: &Value) -> Option<FieldOffset> {
    let Value::Array(items) = value else {
        return None;
    };
    let start = items.get(1).and_then(as_usize)?;
    let length = items.get(2).and_then(as_usize)?;
    Some(FieldOffset::new(start, length, name))
}

pub(crate) fn as_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Text of a scalar, or of the first element / `value` member of a wrapper.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => items.first().and_then(scalar_text),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("show"))
            .and_then(scalar_text),
        Value::Null => None,
    }
}

/// Remove `<field>_raw` members from a layer object, returning their spans.
///
/// Arrays of objects (duplicate layers) are stripped element-wise; only the
/// first element's spans are returned.
pub(crate) fn take_field_spans(value: &mut Value) -> Vec<FieldOffset> {
    match value {
        Value::Object(map) => strip_object(map),
        Value::Array(items) => {
            let mut spans = Vec::new();
            for (idx, item) in items.iter_mut().enumerate() {
                if let Value::Object(map) = item {
                    let stripped = strip_object(map);
                    if idx == 0 {
                        spans = stripped;
                    }
                }
            }
            spans
        }
        _ => Vec::new(),
    }
}

/// Strips `_raw` members at every depth; nested spans follow the outer ones.
fn strip_object(map: &mut Map<String, Value>) -> Vec<FieldOffset> {
    let raw_keys: Vec<String> = map
        .keys()
        .filter(|key| key.ends_with(RAW_SUFFIX))
        .cloned()
        .collect();
    let mut spans: Vec<FieldOffset> = raw_keys
        .into_iter()
        .filter_map(|key| {
            let value = map.remove(&key)?;
            let name = key.strip_suffix(RAW_SUFFIX).unwrap_or(&key);
            raw_span(name, &value)
        })
        .collect();
    for nested in map.values_mut() {
        if matches!(nested, Value::Object(_) | Value::Array(_)) {
            spans.extend(take_field_spans(nested));
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_hex, raw_hex, raw_span, scalar_text, take_field_spans};

    #[test]
    fn raw_hex_accepts_all_shapes() {
        assert_eq!(raw_hex(&json!("0a0b")), Some("0a0b"));
        assert_eq!(raw_hex(&json!(["0a0b", 0, 2, 0, 1])), Some("0a0b"));
        assert_eq!(raw_hex(&json!({"value": "0a0b"})), Some("0a0b"));
        assert_eq!(raw_hex(&json!(12)), None);
    }

    #[test]
    fn decode_hex_strips_separators() {
        assert_eq!(decode_hex("0a:0b:ff").unwrap(), vec![0x0a, 0x0b, 0xff]);
        assert!(decode_hex("0g").is_err());
    }

    #[test]
    fn spans_accept_numbers_and_strings() {
        let span = raw_span("ip", &json!(["4500", 14, "20", 0, 1])).unwrap();
        assert_eq!((span.start, span.length), (14, 20));
        assert!(raw_span("ip", &json!("4500")).is_none());
    }

    #[test]
    fn scalar_text_unwraps_wrappers() {
        assert_eq!(scalar_text(&json!([{"value": "7"}])).as_deref(), Some("7"));
        assert_eq!(scalar_text(&json!(60)).as_deref(), Some("60"));
        assert_eq!(scalar_text(&json!(null)), None);
    }

    #[test]
    fn field_spans_are_removed_from_layer() {
        let mut layer = json!({
            "ip.src": "10.0.0.1",
            "ip.src_raw": ["0a000001", 26, 4, 0, 4],
            "ip.dst_raw": "0a000002"
        });
        let spans = take_field_spans(&mut layer);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "ip.src");
        assert_eq!(layer.as_object().unwrap().len(), 1);
    }

    #[test]
    fn nested_tree_spans_are_removed() {
        let mut layer = json!({
            "tcp.flags": "0x0012",
            "tcp.flags_raw": ["0012", 46, 2, 0, 4],
            "tcp.flags_tree": {
                "tcp.flags.syn": "1",
                "tcp.flags.syn_raw": ["1", 47, 1, 0, 4],
                "tcp.flags.deep_tree": {
                    "tcp.flags.deep.bit_raw": ["0", 47, 1, 0, 4]
                }
            }
        });
        let spans = take_field_spans(&mut layer);
        let names: Vec<&str> = spans.iter().map(|span| span.name.as_str()).collect();
        assert_eq!(names, ["tcp.flags", "tcp.flags.syn", "tcp.flags.deep.bit"]);
        let tree = &layer["tcp.flags_tree"];
        assert!(tree.get("tcp.flags.syn_raw").is_none());
        assert_eq!(tree["tcp.flags.syn"], "1");
        assert_eq!(tree["tcp.flags.deep_tree"].as_object().unwrap().len(), 0);
    }
}
