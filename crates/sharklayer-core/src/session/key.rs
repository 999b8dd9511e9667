use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::SessionError;
use crate::layer::Layer;
use crate::packet::Packet;

/// Endpoint tuple identifying a conversation.
///
/// # Examples
/// ```
/// use sharklayer_core::SessionKey;
///
/// let key = SessionKey::new("tcp", "192.168.1.2", "192.168.1.1", "80", "1234");
/// assert_eq!(key.normalized().to_string(), "tcp:192.168.1.1:1234-192.168.1.2:80");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub protocol: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: String,
    pub dst_port: String,
}

impl SessionKey {
    pub fn new(
        protocol: impl Into<String>,
        src_ip: impl Into<String>,
        dst_ip: impl Into<String>,
        src_port: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            src_ip: src_ip.into(),
            dst_ip: dst_ip.into(),
            src_port: src_port.into(),
            dst_port: dst_port.into(),
        }
    }

    /// Order the endpoints so both directions of a tcp/udp flow share a key.
    ///
    /// Addresses and ports compare as text; other protocols are returned as is.
    pub fn normalized(&self) -> SessionKey {
        if self.protocol != "tcp" && self.protocol != "udp" {
            return self.clone();
        }
        let swap = (self.src_ip.as_str(), self.src_port.as_str())
            > (self.dst_ip.as_str(), self.dst_port.as_str());
        if !swap {
            return self.clone();
        }
        SessionKey {
            protocol: self.protocol.clone(),
            src_ip: self.dst_ip.clone(),
            dst_ip: self.src_ip.clone(),
            src_port: self.dst_port.clone(),
            dst_port: self.src_port.clone(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.protocol, self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Build the (unnormalized) key for a packet.
///
/// The protocol is the transport layer, else the highest layer. Ports come
/// from the transport layer and stay empty without one.
pub fn extract_session_key(packet: &Packet) -> Result<SessionKey, SessionError> {
    let transport = packet.transport_layer();
    let protocol = if transport.is_empty() {
        packet.highest_layer().to_ascii_lowercase()
    } else {
        transport.to_string()
    };

    let network = packet
        .get_layer("ip")
        .or_else(|| packet.get_layer("ipv6"))
        .ok_or(SessionError::NoIpLayer)?;
    let address = |field: &'static str| {
        network
            .get_display_field(field)
            .map(|value| value.to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SessionError::MissingAddress {
                layer: network.layer_name().to_string(),
                field,
            })
    };
    let src_ip = address("src")?;
    let dst_ip = address("dst")?;

    let (src_port, dst_port) = match packet.get_layer(transport) {
        Some(layer) if !transport.is_empty() => {
            let port = |name: &str| {
                layer
                    .get_display_field(name)
                    .map(|value| value.to_string())
            };
            match (port("srcport"), port("dstport")) {
                (Some(src), Some(dst)) => (src, dst),
                _ => (String::new(), String::new()),
            }
        }
        _ => (String::new(), String::new()),
    };

    Ok(SessionKey {
        protocol,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
    })
}
