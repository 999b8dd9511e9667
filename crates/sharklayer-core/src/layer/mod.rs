//! Protocol layers and the uniform field lookup contract.
//!
//! Each source encoding stores a layer differently:
//! - `json`: dotted keys, nested sub-maps, duplicate-layer arrays
//! - `xml`: sanitized names mapped to `FieldContainer`s
//! - `ek`: flat underscore-joined keys that need prefix reconstruction
//!
//! All three implement [`Layer`], and a parsed packet holds them as the
//! [`PacketLayer`] tagged enum. Lookups never fail: a miss is `None`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::field::FieldContainer;

pub mod ek;
pub mod json;
pub mod xml;

pub use ek::{EkLayer, EkMultiField};
pub use json::JsonLayer;
pub use xml::XmlLayer;

/// Marker printed for undissected payload; the dissector names it `data`.
pub const DATA_LAYER_NAME: &str = "DATA";

/// Value returned by a field lookup.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<FieldValue>),
    /// Same-named fields from an XML layer.
    Container(FieldContainer),
    /// Nested or intermediate JSON sub-layer.
    Layer(Arc<JsonLayer>),
    /// EK field that has further underscore-joined subfields.
    MultiField(EkMultiField),
}

impl FieldValue {
    /// Convert a JSON scalar or array; objects are handled by the caller.
    pub(crate) fn from_json_scalar(value: &Value) -> FieldValue {
        match value {
            Value::String(text) => FieldValue::Text(text.clone()),
            Value::Number(number) => match number.as_i64() {
                Some(int) => FieldValue::Int(int),
                None => FieldValue::Float(number.as_f64().unwrap_or_default()),
            },
            Value::Bool(flag) => FieldValue::Bool(*flag),
            Value::Null => FieldValue::Text(String::new()),
            Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json_scalar).collect())
            }
            Value::Object(_) => FieldValue::Text(value.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Container(container) => Some(container.default_value()),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&FieldContainer> {
        match self {
            FieldValue::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_layer(&self) -> Option<&Arc<JsonLayer>> {
        match self {
            FieldValue::Layer(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_multi_field(&self) -> Option<&EkMultiField> {
        match self {
            FieldValue::MultiField(field) => Some(field),
            _ => None,
        }
    }

    /// Lenient integer view: decimal or `0x`-prefixed hex text, or a number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(int) => Some(*int),
            FieldValue::Float(float) => Some(*float as i64),
            FieldValue::Bool(flag) => Some(i64::from(*flag)),
            FieldValue::MultiField(field) => field.value().and_then(FieldValue::as_i64),
            FieldValue::Layer(layer) => layer.value().and_then(|value| value.as_i64()),
            FieldValue::List(items) => items.first().and_then(FieldValue::as_i64),
            FieldValue::Text(_) | FieldValue::Container(_) => {
                parse_int_text(self.as_text().unwrap_or_default())
            }
        }
    }

    /// Lenient boolean view: `1`/`0`, `true`/`false`, `yes`/`no`, or a number.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(flag) => Some(*flag),
            FieldValue::Int(int) => Some(*int != 0),
            FieldValue::Float(float) => Some(*float != 0.0),
            FieldValue::MultiField(field) => field.value().and_then(FieldValue::as_bool),
            FieldValue::Layer(layer) => layer.value().and_then(|value| value.as_bool()),
            FieldValue::List(items) => items.first().and_then(FieldValue::as_bool),
            FieldValue::Text(_) | FieldValue::Container(_) => {
                parse_bool_text(self.as_text().unwrap_or_default())
            }
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::List(a), FieldValue::List(b)) => a == b,
            (FieldValue::Container(a), FieldValue::Container(b)) => a == b,
            (FieldValue::Layer(a), FieldValue::Layer(b)) => Arc::ptr_eq(a, b),
            (FieldValue::MultiField(a), FieldValue::MultiField(b)) => {
                a.full_name() == b.full_name() && a.value() == b.value()
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Int(int) => write!(f, "{int}"),
            FieldValue::Float(float) => write!(f, "{float}"),
            FieldValue::Bool(flag) => write!(f, "{flag}"),
            FieldValue::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            FieldValue::Container(container) => f.write_str(container.default_value()),
            FieldValue::Layer(layer) => match layer.value() {
                Some(value) => write!(f, "{value}"),
                None => write!(f, "<{} Layer>", layer.layer_name().to_uppercase()),
            },
            FieldValue::MultiField(field) => write!(f, "{field}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Capability set shared by every layer variant.
pub trait Layer: fmt::Debug + Send + Sync {
    fn layer_name(&self) -> &str;

    /// Resolve a field; `None` when absent.
    fn get_field(&self, name: &str) -> Option<FieldValue>;

    /// Field names in a stable order, without duplicates.
    fn field_names(&self) -> Vec<String>;

    /// Like [`Layer::get_field`], but always the display value: XML raw mode
    /// does not apply.
    fn get_display_field(&self, name: &str) -> Option<FieldValue> {
        self.get_field(name)
    }

    fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
            || self
                .field_names()
                .iter()
                .any(|field| field.eq_ignore_ascii_case(name))
    }

    /// Field value, or `default` when the layer does not have it.
    fn get(&self, name: &str, default: FieldValue) -> FieldValue {
        if self.has_field(name) {
            self.get_field(name).unwrap_or(default)
        } else {
            default
        }
    }

    fn get_str(&self, name: &str) -> Option<String> {
        self.get_field(name).map(|value| value.to_string())
    }

    fn get_int(&self, name: &str, default: i64) -> i64 {
        self.get_field(name)
            .and_then(|value| value.as_i64())
            .unwrap_or(default)
    }

    fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get_field(name)
            .and_then(|value| value.as_bool())
            .unwrap_or(default)
    }
}

/// A layer as stored in a parsed packet.
#[derive(Debug, Clone)]
pub enum PacketLayer {
    Json(JsonLayer),
    Xml(XmlLayer),
    Ek(EkLayer),
}

impl PacketLayer {
    fn inner(&self) -> &dyn Layer {
        match self {
            PacketLayer::Json(layer) => layer,
            PacketLayer::Xml(layer) => layer,
            PacketLayer::Ek(layer) => layer,
        }
    }

    pub fn as_json(&self) -> Option<&JsonLayer> {
        match self {
            PacketLayer::Json(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_xml(&self) -> Option<&XmlLayer> {
        match self {
            PacketLayer::Xml(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_ek(&self) -> Option<&EkLayer> {
        match self {
            PacketLayer::Ek(layer) => Some(layer),
            _ => None,
        }
    }
}

impl Layer for PacketLayer {
    fn layer_name(&self) -> &str {
        self.inner().layer_name()
    }

    fn get_field(&self, name: &str) -> Option<FieldValue> {
        self.inner().get_field(name)
    }

    fn field_names(&self) -> Vec<String> {
        self.inner().field_names()
    }

    fn get_display_field(&self, name: &str) -> Option<FieldValue> {
        self.inner().get_display_field(name)
    }

    fn has_field(&self, name: &str) -> bool {
        self.inner().has_field(name)
    }
}

impl From<JsonLayer> for PacketLayer {
    fn from(layer: JsonLayer) -> Self {
        PacketLayer::Json(layer)
    }
}

impl From<XmlLayer> for PacketLayer {
    fn from(layer: XmlLayer) -> Self {
        PacketLayer::Xml(layer)
    }
}

impl From<EkLayer> for PacketLayer {
    fn from(layer: EkLayer) -> Self {
        PacketLayer::Ek(layer)
    }
}

impl fmt::Display for PacketLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.layer_name().eq_ignore_ascii_case(DATA_LAYER_NAME) {
            return f.write_str(DATA_LAYER_NAME);
        }
        writeln!(f, "Layer {}:", self.layer_name().to_uppercase())?;
        write_fields(f, self.inner(), 1)
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, layer: &dyn Layer, depth: usize) -> fmt::Result {
    let indent = "\t".repeat(depth);
    for name in layer.field_names() {
        match layer.get_field(&name) {
            Some(FieldValue::Layer(nested)) if nested.value().is_none() => {
                writeln!(f, "{indent}{name}:")?;
                write_fields(f, nested.as_ref(), depth + 1)?;
            }
            Some(FieldValue::Container(container)) if container.len() > 1 => {
                for field in container.all_fields() {
                    writeln!(f, "{indent}{name}: {}", field.default_value())?;
                }
            }
            Some(value) => writeln!(f, "{indent}{name}: {value}")?,
            None => {}
        }
    }
    Ok(())
}

/// Strip `prefix` and replace `.`/`-` with `_`.
pub(crate) fn sanitize_field_name(name: &str, prefix: &str) -> String {
    name.strip_prefix(prefix)
        .unwrap_or(name)
        .replace(['.', '-'], "_")
}

/// Dotted prefix of a layer's field names; `geninfo` fields carry none.
pub(crate) fn field_prefix(layer_name: &str) -> String {
    if layer_name == "geninfo" {
        String::new()
    } else {
        format!("{layer_name}.")
    }
}

pub(crate) fn parse_int_text(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(digits, 16).ok();
    }
    text.parse::<i64>().ok()
}

pub(crate) fn parse_bool_text(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "set" => Some(true),
        "0" | "false" | "no" | "not set" => Some(false),
        other => parse_int_text(other).map(|value| value != 0),
    }
}
