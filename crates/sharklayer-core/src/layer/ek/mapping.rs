//! Type hints for EK fields.
//!
//! EK documents carry most values as strings. Fields listed here are cast
//! to their natural type on lookup; anything unknown is passed through.

use serde_json::Value;

use crate::layer::{FieldValue, parse_bool_text, parse_int_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    /// Epoch or RFC3339 text, kept verbatim.
    Timestamp,
}

const MAPPINGS: &[(&str, &str, FieldKind)] = &[
    ("frame", "frame_time_epoch", FieldKind::Timestamp),
    ("frame", "frame_time_relative", FieldKind::Float),
    ("frame", "frame_time_delta", FieldKind::Float),
    ("frame", "frame_number", FieldKind::Int),
    ("frame", "frame_len", FieldKind::Int),
    ("frame", "frame_cap_len", FieldKind::Int),
    ("frame", "frame_marked", FieldKind::Bool),
    ("frame", "frame_ignored", FieldKind::Bool),
    ("ip", "ip_version", FieldKind::Int),
    ("ip", "ip_hdr_len", FieldKind::Int),
    ("ip", "ip_dsfield_dscp", FieldKind::Int),
    ("ip", "ip_len", FieldKind::Int),
    ("ip", "ip_id", FieldKind::Int),
    ("ip", "ip_flags", FieldKind::Int),
    ("ip", "ip_ttl", FieldKind::Int),
    ("ip", "ip_proto", FieldKind::Int),
    ("ip", "ip_checksum", FieldKind::Int),
    ("tcp", "tcp_srcport", FieldKind::Int),
    ("tcp", "tcp_dstport", FieldKind::Int),
    ("tcp", "tcp_seq", FieldKind::Int),
    ("tcp", "tcp_ack", FieldKind::Int),
    ("tcp", "tcp_hdr_len", FieldKind::Int),
    ("tcp", "tcp_flags", FieldKind::Int),
    ("tcp", "tcp_window_size", FieldKind::Int),
    ("tcp", "tcp_checksum", FieldKind::Int),
    ("tcp", "tcp_urgent_pointer", FieldKind::Int),
    ("udp", "udp_srcport", FieldKind::Int),
    ("udp", "udp_dstport", FieldKind::Int),
    ("udp", "udp_length", FieldKind::Int),
    ("udp", "udp_checksum", FieldKind::Int),
    ("dns", "dns_id", FieldKind::Int),
    ("dns", "dns_flags", FieldKind::Int),
    ("dns", "dns_count_queries", FieldKind::Int),
    ("dns", "dns_count_answers", FieldKind::Int),
    ("dns", "dns_count_auth_rr", FieldKind::Int),
    ("dns", "dns_count_add_rr", FieldKind::Int),
    ("http", "http_response_code", FieldKind::Int),
    ("http", "http_content_length", FieldKind::Int),
];

/// Find the kind for an EK key; `<layer>_<layer>_x` is looked up as `<layer>_x`.
pub fn field_kind(layer: &str, key: &str) -> Option<FieldKind> {
    let layer = layer.to_ascii_lowercase();
    let key = key.to_ascii_lowercase();
    let doubled = format!("{layer}_{layer}_");
    let key = match key.strip_prefix(&doubled) {
        Some(rest) => format!("{layer}_{rest}"),
        None => key,
    };
    MAPPINGS
        .iter()
        .find(|(l, f, _)| *l == layer && *f == key)
        .or_else(|| MAPPINGS.iter().find(|(_, f, _)| *f == key))
        .map(|(_, _, kind)| *kind)
}

/// Convert a stored value, casting when the key has a known kind.
pub fn cast_value(layer: &str, key: &str, value: &Value) -> FieldValue {
    match field_kind(layer, key) {
        Some(kind) => cast(kind, value),
        None => FieldValue::from_json_scalar(value),
    }
}

fn cast(kind: FieldKind, value: &Value) -> FieldValue {
    if let Value::Array(items) = value {
        return FieldValue::List(items.iter().map(|item| cast(kind, item)).collect());
    }
    let fallback = || FieldValue::from_json_scalar(value);
    match kind {
        FieldKind::Int => match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64))
                .map(FieldValue::Int)
                .unwrap_or_else(fallback),
            Value::String(text) => parse_int_text(text)
                .map(FieldValue::Int)
                .unwrap_or_else(fallback),
            _ => fallback(),
        },
        FieldKind::Float => match value {
            Value::Number(number) => number
                .as_f64()
                .map(FieldValue::Float)
                .unwrap_or_else(fallback),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map(FieldValue::Float)
                .unwrap_or_else(|_| fallback()),
            _ => fallback(),
        },
        FieldKind::Bool => match value {
            Value::Bool(flag) => FieldValue::Bool(*flag),
            Value::Number(number) => FieldValue::Bool(number.as_f64() != Some(0.0)),
            Value::String(text) => parse_bool_text(text)
                .map(FieldValue::Bool)
                .unwrap_or_else(fallback),
            _ => fallback(),
        },
        FieldKind::Timestamp => match value {
            Value::Number(number) => FieldValue::Text(number.to_string()),
            _ => fallback(),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FieldKind, cast_value, field_kind};
    use crate::layer::FieldValue;

    #[test]
    fn doubled_prefix_resolves_to_table_entry() {
        assert_eq!(field_kind("ip", "ip_ip_ttl"), Some(FieldKind::Int));
        assert_eq!(field_kind("IP", "ip_ttl"), Some(FieldKind::Int));
        assert_eq!(field_kind("ip", "ip_src"), None);
    }

    #[test]
    fn field_name_match_ignores_layer() {
        assert_eq!(field_kind("ipv6", "tcp_srcport"), Some(FieldKind::Int));
    }

    #[test]
    fn casts_known_fields() {
        assert_eq!(cast_value("tcp", "tcp_tcp_flags", &json!("0x0012")), FieldValue::Int(18));
        assert_eq!(cast_value("frame", "frame_frame_len", &json!("60")), FieldValue::Int(60));
        assert_eq!(
            cast_value("frame", "frame_frame_marked", &json!("0")),
            FieldValue::Bool(false)
        );
        assert_eq!(
            cast_value("frame", "frame_frame_time_relative", &json!("0.5")),
            FieldValue::Float(0.5)
        );
    }

    #[test]
    fn uncastable_values_pass_through() {
        assert_eq!(
            cast_value("tcp", "tcp_tcp_seq", &json!("n/a")),
            FieldValue::Text("n/a".into())
        );
        assert_eq!(
            cast_value("ip", "ip_ip_src", &json!("10.0.0.1")),
            FieldValue::Text("10.0.0.1".into())
        );
    }
}
