//! Field records and same-name containers.
//!
//! A `Field` is one dissected value with its display metadata. Some encodings
//! repeat a field name within a layer (e.g. several `ip.addr` entries), so the
//! lookup unit is a `FieldContainer`: an ordered list of fields that share a
//! name, in the order the dissector emitted them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned when converting a field's raw value.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("invalid hex value '{value}': {source}")]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
    },
    #[error("invalid integer value '{value}': {source}")]
    InvalidInt {
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("no fields in container")]
    EmptyContainer,
}

/// One dissected field.
///
/// # Examples
/// ```
/// use sharklayer_core::Field;
///
/// let field = Field::new("ip.src")
///     .with_show("10.0.0.1")
///     .with_raw_value("0a000001");
/// assert_eq!(field.default_value(), "10.0.0.1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Fully qualified field name as emitted by the dissector (`ip.src`).
    pub name: String,
    /// Display line, typically `Pretty name: pretty value`.
    pub showname: String,
    /// Raw value (hex bytes or plain digits, depending on the field).
    pub raw_value: String,
    /// Rendered value.
    pub show: String,
    /// Field is hidden in the dissector's tree view.
    pub hide: bool,
    /// Byte offset of the field within the frame, when captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<usize>,
    /// Byte length of the field within the frame, when captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Value before bitmask application, when the dissector provides one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unmasked_value: String,
    /// Nested `<field>` children, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_show(mut self, show: impl Into<String>) -> Self {
        self.show = show.into();
        self
    }

    pub fn with_raw_value(mut self, raw_value: impl Into<String>) -> Self {
        self.raw_value = raw_value.into();
        self
    }

    pub fn with_showname(mut self, showname: impl Into<String>) -> Self {
        self.showname = showname.into();
        self
    }

    pub fn with_span(mut self, pos: usize, size: usize) -> Self {
        self.pos = Some(pos);
        self.size = Some(size);
        self
    }

    /// Best available value: `show`, then the raw value, then `showname`.
    pub fn default_value(&self) -> &str {
        if !self.show.is_empty() {
            &self.show
        } else if !self.raw_value.is_empty() {
            &self.raw_value
        } else {
            &self.showname
        }
    }

    /// Pretty name part of `showname` (before the first `": "`).
    pub fn showname_key(&self) -> Option<&str> {
        self.showname.split_once(": ").map(|(key, _)| key)
    }

    /// Pretty value part of `showname` (after the first `": "`).
    pub fn showname_value(&self) -> Option<&str> {
        self.showname.split_once(": ").map(|(_, value)| value)
    }

    /// Decode the raw value as hex bytes, left-padding odd-length input.
    pub fn binary_value(&self) -> Result<Vec<u8>, FieldError> {
        let padded;
        let value = if self.raw_value.len() % 2 == 1 {
            padded = format!("0{}", self.raw_value);
            padded.as_str()
        } else {
            self.raw_value.as_str()
        };
        hex::decode(value).map_err(|source| FieldError::InvalidHex {
            value: self.raw_value.clone(),
            source,
        })
    }

    /// Parse the raw value as a decimal integer.
    pub fn int_value(&self) -> Result<i64, FieldError> {
        self.raw_value
            .parse::<i64>()
            .map_err(|source| FieldError::InvalidInt {
                value: self.raw_value.clone(),
                source,
            })
    }

    /// Parse the raw value as base 16, with or without a `0x` prefix.
    pub fn hex_value(&self) -> Result<i64, FieldError> {
        let digits = self
            .raw_value
            .strip_prefix("0x")
            .unwrap_or(&self.raw_value);
        i64::from_str_radix(digits, 16).map_err(|source| FieldError::InvalidInt {
            value: self.raw_value.clone(),
            source,
        })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_value())
    }
}

/// Ordered collection of same-named fields; the first one is the main field.
///
/// # Examples
/// ```
/// use sharklayer_core::{Field, FieldContainer};
///
/// let mut container = FieldContainer::new(Field::new("ip.addr").with_show("10.0.0.1"));
/// container.add_field(Field::new("ip.addr").with_show("10.0.0.2"));
/// assert_eq!(container.len(), 2);
/// assert_eq!(container.default_value(), "10.0.0.1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldContainer {
    fields: Vec<Field>,
}

impl FieldContainer {
    pub fn new(main: Field) -> Self {
        Self { fields: vec![main] }
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn main_field(&self) -> Option<&Field> {
        self.fields.first()
    }

    pub fn all_fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn default_value(&self) -> &str {
        self.main_field().map(Field::default_value).unwrap_or("")
    }

    /// Direct child of the main field, matched by full or trailing name.
    pub fn subfield(&self, name: &str) -> Option<&Field> {
        let main = self.main_field()?;
        main.children.iter().find(|child| {
            child.name.eq_ignore_ascii_case(name)
                || child
                    .name
                    .rsplit('.')
                    .next()
                    .is_some_and(|tail| tail.eq_ignore_ascii_case(name))
        })
    }

    pub fn binary_value(&self) -> Result<Vec<u8>, FieldError> {
        self.main()?.binary_value()
    }

    pub fn int_value(&self) -> Result<i64, FieldError> {
        self.main()?.int_value()
    }

    pub fn hex_value(&self) -> Result<i64, FieldError> {
        self.main()?.hex_value()
    }

    fn main(&self) -> Result<&Field, FieldError> {
        self.main_field().ok_or(FieldError::EmptyContainer)
    }
}

impl fmt::Display for FieldContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_value())
    }
}

#[cfg(test)]
mod tests {
    use super::{Field, FieldContainer, FieldError};
    use proptest::prelude::*;

    #[test]
    fn default_value_falls_back_to_showname() {
        let field = Field::new("tcp.analysis").with_showname("SEQ/ACK analysis");
        assert_eq!(field.default_value(), "SEQ/ACK analysis");
        assert_eq!(Field::new("empty").default_value(), "");
    }

    #[test]
    fn showname_parts_split_on_first_separator() {
        let field = Field::new("http.host").with_showname("Host: example.com: 8080");
        assert_eq!(field.showname_key(), Some("Host"));
        assert_eq!(field.showname_value(), Some("example.com: 8080"));
        assert_eq!(Field::new("x").with_showname("plain").showname_key(), None);
    }

    #[test]
    fn binary_value_pads_odd_length() {
        let field = Field::new("data").with_raw_value("abc");
        assert_eq!(field.binary_value().unwrap(), vec![0x0a, 0xbc]);
    }

    #[test]
    fn binary_value_rejects_non_hex() {
        let err = Field::new("data").with_raw_value("zz").binary_value().unwrap_err();
        assert!(matches!(err, FieldError::InvalidHex { .. }));
    }

    #[test]
    fn int_and_hex_values() {
        assert_eq!(Field::new("len").with_raw_value("1500").int_value().unwrap(), 1500);
        assert_eq!(Field::new("flags").with_raw_value("0x0012").hex_value().unwrap(), 0x12);
        assert_eq!(Field::new("flags").with_raw_value("ff").hex_value().unwrap(), 255);
        assert!(Field::new("len").with_raw_value("15x").int_value().is_err());
    }

    #[test]
    fn container_keeps_encounter_order() {
        let mut container = FieldContainer::new(Field::new("ip.addr").with_show("a"));
        container.add_field(Field::new("ip.addr").with_show("b"));
        container.add_field(Field::new("ip.addr").with_show("c"));
        let shows: Vec<_> = container.all_fields().iter().map(|f| f.show.as_str()).collect();
        assert_eq!(shows, ["a", "b", "c"]);
        assert_eq!(container.to_string(), "a");
    }

    #[test]
    fn empty_container_reports_error() {
        let container = FieldContainer::default();
        assert_eq!(container.default_value(), "");
        assert!(matches!(container.int_value(), Err(FieldError::EmptyContainer)));
    }

    #[test]
    fn subfield_matches_trailing_name() {
        let mut parent = Field::new("tcp.flags").with_show("0x0012");
        parent.children.push(Field::new("tcp.flags.syn").with_show("1"));
        let container = FieldContainer::new(parent);
        assert_eq!(container.subfield("syn").unwrap().show, "1");
        assert_eq!(container.subfield("tcp.flags.syn").unwrap().show, "1");
        assert!(container.subfield("fin").is_none());
    }

    proptest! {
        #[test]
        fn default_value_precedence(show in "[a-z]{0,3}", raw in "[0-9]{0,3}", showname in "[A-Z]{0,3}") {
            let field = Field::new("f")
                .with_show(show.clone())
                .with_raw_value(raw.clone())
                .with_showname(showname.clone());
            let expected = if !show.is_empty() {
                show
            } else if !raw.is_empty() {
                raw
            } else {
                showname
            };
            prop_assert_eq!(field.default_value(), expected.as_str());
        }
    }
}
