//! Sharklayer core: a uniform packet model over tshark dissection output.
//!
//! The dissector emits the same information in three shapes: a nested JSON
//! array (`-T json`), PDML (`-T pdml`) and Elasticsearch bulk lines
//! (`-T ek`). The [`parser`] module turns each of them into [`Packet`]s whose
//! layers answer the same [`Layer`] lookups whatever the source encoding.
//! A [`SessionTracker`] groups packets into bidirectional conversations with
//! a coarse TCP lifecycle. All file I/O is isolated in `source`.
//!
//! Invariants:
//! - Layer order is deterministic: `frame` first, map-backed encodings sorted
//!   by name, PDML in document order.
//! - A malformed unit only fails itself; its neighbours still decode.
//! - Report outputs are stable across runs.
//!
//! # Examples
//! ```
//! use sharklayer_core::{Encoding, Layer, ParserOptions, parse_packets};
//!
//! let pdml = br#"<pdml><packet>
//!   <proto name="ip"><field name="ip.src" show="10.0.0.1" value="0a000001"/></proto>
//! </packet></pdml>"#;
//! let packets = parse_packets(Encoding::Xml, pdml, &ParserOptions::default())?;
//! let src = packets[0].get_layer("ip").and_then(|ip| ip.get_field("ip.src"));
//! assert_eq!(src.map(|value| value.to_string()).as_deref(), Some("10.0.0.1"));
//! # Ok::<(), sharklayer_core::ParseError>(())
//! ```

use serde::{Deserialize, Serialize};

mod analysis;
pub mod field;
pub mod layer;
pub mod packet;
pub mod parser;
pub mod session;
mod source;
mod timestamp;

pub use analysis::{AnalysisError, analyze_file, analyze_input};
pub use field::{Field, FieldContainer, FieldError};
pub use layer::{EkLayer, EkMultiField, FieldValue, JsonLayer, Layer, PacketLayer, XmlLayer};
pub use packet::{FieldOffset, FrameInfo, Packet, PacketError, PacketSummary};
pub use parser::{
    EkParser, Encoding, JsonParser, PacketParser, ParseError, ParserOptions, XmlParser,
    parse_packets, parser_for,
};
pub use session::{
    Session, SessionError, SessionKey, SessionState, SessionSummary, SessionTracker, TcpFlags,
    extract_session_key,
};
pub use source::{DissectionInput, SourceError, encoding_from_extension};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Default timestamp used when no capture time is available.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// Analysis report with deterministic ordering.
///
/// # Examples
/// ```
/// use sharklayer_core::{Encoding, make_stub_report};
///
/// let report = make_stub_report("capture.json", 123, Encoding::Json);
/// assert_eq!(report.report_version, sharklayer_core::REPORT_VERSION);
/// assert!(report.sessions.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    pub tool: ToolInfo,
    /// RFC3339 time of the last packet, or [`DEFAULT_GENERATED_AT`].
    pub generated_at: String,

    pub input: InputInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_summary: Option<CaptureSummary>,
    /// One entry per decoded packet, in input order.
    pub packets: Vec<PacketSummary>,
    /// Conversations ordered by key.
    pub sessions: Vec<SessionSummary>,
    /// Units that failed to decode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decode_errors: Vec<DecodeError>,
}

/// Tool metadata embedded in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    /// Tool version (semver).
    pub version: String,
}

/// Input metadata embedded in reports.
///
/// # Examples
/// ```
/// use sharklayer_core::{Encoding, InputInfo};
///
/// let input = InputInfo {
///     path: "capture.pdml".to_string(),
///     bytes: 1024,
///     encoding: Encoding::Xml,
/// };
/// assert_eq!(input.bytes, 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    /// Input path as provided to the analyzer.
    pub path: String,
    pub bytes: u64,
    pub encoding: Encoding,
}

/// Basic capture summary (timestamps may be absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Packets decoded successfully.
    pub packets_total: u64,
    /// RFC3339 timestamp of the earliest packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    /// RFC3339 timestamp of the latest packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
}

/// A unit the parser rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<usize>,
    pub message: String,
}

/// Build a report with base fields filled and empty aggregates.
pub fn make_stub_report(input_path: &str, input_bytes: u64, encoding: Encoding) -> Report {
    Report {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "sharklayer".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: DEFAULT_GENERATED_AT.to_string(),
        input: InputInfo {
            path: input_path.to_string(),
            bytes: input_bytes,
            encoding,
        },
        capture_summary: None,
        packets: vec![],
        sessions: vec![],
        decode_errors: vec![],
    }
}
