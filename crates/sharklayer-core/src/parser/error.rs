use thiserror::Error;

/// Errors returned while decoding dissector output.
///
/// `unit` is the zero-based index of the packet element (JSON, PDML) or the
/// input line (EK) that failed; units decoded before it stay valid.
///
/// # Examples
/// ```
/// use sharklayer_core::ParseError;
///
/// let err = ParseError::MissingLayers { unit: 3 };
/// assert!(err.to_string().contains("unit 3"));
/// ```
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON document: {source}")]
    Document { source: serde_json::Error },
    #[error("invalid JSON in unit {unit}: {source}")]
    Json {
        unit: usize,
        source: serde_json::Error,
    },
    #[error("unit {unit} has no layers object")]
    MissingLayers { unit: usize },
    #[error("invalid layer '{layer}' in unit {unit}: {message}")]
    InvalidLayer {
        unit: usize,
        layer: String,
        message: String,
    },
    #[error("invalid XML in unit {unit}: {message}")]
    Xml { unit: usize, message: String },
    #[error("unexpected end of input in unit {unit}")]
    UnexpectedEof { unit: usize },
}

impl ParseError {
    /// Index of the failing unit, when the error is tied to one.
    pub fn unit(&self) -> Option<usize> {
        match self {
            ParseError::Document { .. } => None,
            ParseError::Json { unit, .. }
            | ParseError::MissingLayers { unit }
            | ParseError::InvalidLayer { unit, .. }
            | ParseError::Xml { unit, .. }
            | ParseError::UnexpectedEof { unit } => Some(*unit),
        }
    }
}
