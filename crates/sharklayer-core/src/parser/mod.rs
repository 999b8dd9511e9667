//! Decoders for the three dissector output encodings.
//!
//! Every parser turns one byte buffer into a list of [`Packet`]s.
//! `parse_units` keeps a result per unit so one malformed packet does not
//! discard the ones around it; `parse_packets` is the all-or-nothing form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::packet::Packet;

pub mod error;
mod ek;
mod json;
mod raw;
mod xml;

pub use ek::EkParser;
pub use error::ParseError;
pub use json::JsonParser;
pub use xml::XmlParser;

/// Encoding of a dissector output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// A single JSON array of packet documents (`-T json`).
    Json,
    /// A PDML document (`-T pdml`).
    Xml,
    /// Newline-delimited Elasticsearch documents (`-T ek`).
    Ek,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Xml => "xml",
            Encoding::Ek => "ek",
        }
    }

    /// Infer the encoding from the first significant byte.
    ///
    /// # Examples
    /// ```
    /// use sharklayer_core::Encoding;
    ///
    /// assert_eq!(Encoding::sniff(b"  [{\"_source\": {}}]"), Some(Encoding::Json));
    /// assert_eq!(Encoding::sniff(b"<?xml version=\"1.0\"?>"), Some(Encoding::Xml));
    /// assert_eq!(Encoding::sniff(b"{\"index\": {}}"), Some(Encoding::Ek));
    /// assert_eq!(Encoding::sniff(b""), None);
    /// ```
    pub fn sniff(bytes: &[u8]) -> Option<Encoding> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        match bytes.iter().copied().find(|byte| !byte.is_ascii_whitespace())? {
            b'[' => Some(Encoding::Json),
            b'<' => Some(Encoding::Xml),
            b'{' => Some(Encoding::Ek),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "xml" | "pdml" => Ok(Encoding::Xml),
            "ek" | "ndjson" => Ok(Encoding::Ek),
            other => Err(format!("unknown encoding '{other}'")),
        }
    }
}

/// Options shared by all parsers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Keep byte positions and sizes (and build offset tables) where the
    /// encoding carries them.
    pub include_raw: bool,
    /// XML lookups return raw value text instead of field containers.
    pub raw_mode: bool,
}

impl ParserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_raw(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }

    pub fn with_raw_mode(mut self, raw_mode: bool) -> Self {
        self.raw_mode = raw_mode;
        self
    }
}

/// A decoder from one encoding into packets.
pub trait PacketParser: Send + Sync {
    fn encoding(&self) -> Encoding;

    /// Decode every unit, keeping failures in place.
    fn parse_units(&self, input: &[u8]) -> Vec<Result<Packet, ParseError>>;

    /// Decode every unit, stopping at the first failure.
    fn parse_packets(&self, input: &[u8]) -> Result<Vec<Packet>, ParseError> {
        self.parse_units(input).into_iter().collect()
    }
}

pub fn parser_for(encoding: Encoding, options: ParserOptions) -> Box<dyn PacketParser> {
    match encoding {
        Encoding::Json => Box::new(JsonParser::new(options)),
        Encoding::Xml => Box::new(XmlParser::new(options)),
        Encoding::Ek => Box::new(EkParser::new(options)),
    }
}

/// Decode `input` with the parser for `encoding`.
///
/// # Examples
/// ```
/// use sharklayer_core::{Encoding, Layer, ParserOptions, parse_packets};
///
/// let input = br#"[{"_index": "packets-1", "_source": {"layers": {
///     "frame": {"frame.number": "1", "frame.time_epoch": "1.5"},
///     "ip": {"ip.src": "10.0.0.1", "ip.dst": "10.0.0.2"}
/// }}}]"#;
/// let packets = parse_packets(Encoding::Json, input, &ParserOptions::default())?;
/// let ip = packets[0].get_layer("ip").expect("ip layer");
/// assert_eq!(ip.get_str("src").as_deref(), Some("10.0.0.1"));
/// # Ok::<(), sharklayer_core::ParseError>(())
/// ```
pub fn parse_packets(
    encoding: Encoding,
    input: &[u8],
    options: &ParserOptions,
) -> Result<Vec<Packet>, ParseError> {
    parser_for(encoding, *options).parse_packets(input)
}
