use thiserror::Error;

/// Errors returned by packet accessors.
///
/// # Examples
/// ```
/// use sharklayer_core::PacketError;
///
/// let err = PacketError::SniffTimeUnavailable;
/// assert!(err.to_string().contains("not available"));
/// ```
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("sniff time epoch not available")]
    SniffTimeUnavailable,
    #[error("invalid sniff time '{value}'")]
    InvalidSniffTime { value: String },
}
