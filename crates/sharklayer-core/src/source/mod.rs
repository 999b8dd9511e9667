//! Loading dissector output from disk.
//!
//! All file I/O of the crate lives here; parsers only ever see byte slices.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::parser::Encoding;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot tell the encoding of {path}: pass one explicitly")]
    UnknownEncoding { path: String },
}

/// A buffer of dissector output together with its encoding.
#[derive(Debug, Clone)]
pub struct DissectionInput {
    pub encoding: Encoding,
    pub data: Vec<u8>,
}

impl DissectionInput {
    /// Read `path` whole.
    ///
    /// The encoding is `explicit` when given, else sniffed from the content,
    /// else inferred from the file extension.
    pub fn open(path: &Path, explicit: Option<Encoding>) -> Result<Self, SourceError> {
        let data = fs::read(path)?;
        let encoding = explicit
            .or_else(|| Encoding::sniff(&data))
            .or_else(|| encoding_from_extension(path))
            .ok_or_else(|| SourceError::UnknownEncoding {
                path: path.display().to_string(),
            })?;
        debug!(path = %path.display(), %encoding, bytes = data.len(), "loaded input");
        Ok(Self { encoding, data })
    }

    pub fn from_bytes(encoding: Encoding, data: impl Into<Vec<u8>>) -> Self {
        Self {
            encoding,
            data: data.into(),
        }
    }
}

pub fn encoding_from_extension(path: &Path) -> Option<Encoding> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "json" => Some(Encoding::Json),
        "pdml" | "xml" => Some(Encoding::Xml),
        "ndjson" | "ek" | "jsonl" => Some(Encoding::Ek),
        _ => None,
    }
}
