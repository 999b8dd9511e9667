use thiserror::Error;

/// Reasons a packet cannot be assigned to a session.
///
/// # Examples
/// ```
/// use sharklayer_core::SessionError;
///
/// assert_eq!(SessionError::NoIpLayer.to_string(), "packet has no ip or ipv6 layer");
/// ```
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("packet has no ip or ipv6 layer")]
    NoIpLayer,
    #[error("{layer} layer is missing its {field} address")]
    MissingAddress { layer: String, field: &'static str },
}
