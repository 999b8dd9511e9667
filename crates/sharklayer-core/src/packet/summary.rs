use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use super::Packet;
use crate::layer::{FieldValue, Layer, PacketLayer};

/// One-line view of a packet, as a packet list would show it.
///
/// # Examples
/// ```
/// use sharklayer_core::PacketSummary;
///
/// let summary = PacketSummary {
///     number: Some(1),
///     time: None,
///     source: "10.0.0.1".to_string(),
///     destination: "10.0.0.2".to_string(),
///     protocol: "tcp".to_string(),
///     length: Some(60),
///     info: "Port 51000 -> 443".to_string(),
/// };
/// assert!(summary.to_string().starts_with("#1 "));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketSummary {
    /// Frame number, when the dissector reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// RFC3339 capture time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub source: String,
    pub destination: String,
    /// Highest layer name.
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Protocol-specific detail; empty when nothing applies.
    pub info: String,
}

impl PacketSummary {
    pub fn from_packet(packet: &Packet) -> Self {
        let frame = packet.frame();
        let protocol = packet.highest_layer().to_string();
        let network = packet.get_layer("ip").or_else(|| packet.get_layer("ipv6"));
        let address = |name: &str| {
            network
                .and_then(|layer| layer.get_display_field(name))
                .map(|value| value.to_string())
                .unwrap_or_default()
        };
        Self {
            number: frame.number.trim().parse().ok(),
            time: packet
                .sniff_time()
                .ok()
                .and_then(|time| time.format(&Rfc3339).ok()),
            source: address("src"),
            destination: address("dst"),
            info: info_for(packet, &protocol),
            protocol,
            length: frame.len.trim().parse().ok(),
        }
    }

    /// `protocol src -> dst info`
    pub fn description(&self) -> String {
        format!(
            "{} {} -> {} {}",
            self.protocol, self.source, self.destination, self.info
        )
    }
}

impl fmt::Display for PacketSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let number = self.number.map(|n| n.to_string()).unwrap_or_default();
        let length = self.length.unwrap_or_default();
        write!(
            f,
            "#{number} {} {} -> {} [{}] {length} bytes: {}",
            self.time.as_deref().unwrap_or("-"),
            self.source,
            self.destination,
            self.protocol,
            self.info
        )
    }
}

fn info_for(packet: &Packet, protocol: &str) -> String {
    let layer_name = protocol.to_ascii_lowercase();
    let Some(layer) = packet.get_layer(&layer_name) else {
        return String::new();
    };
    match layer_name.as_str() {
        "http" => http_info(layer),
        "dns" => dns_info(layer),
        "tcp" | "udp" => port_info(layer),
        "icmp" => icmp_info(layer),
        _ => String::new(),
    }
}

/// Field lookup that also searches nested JSON trees.
fn find(layer: &PacketLayer, name: &str) -> Option<FieldValue> {
    layer
        .get_display_field(name)
        .or_else(|| layer.as_json().and_then(|json| json.find_field(name)))
}

fn joined(first: Option<FieldValue>, second: Option<FieldValue>, sep: &str) -> Option<String> {
    let first = first?;
    Some(match second {
        Some(second) => format!("{first}{sep}{second}"),
        None => first.to_string(),
    })
}

fn http_info(layer: &PacketLayer) -> String {
    if let Some(method) = find(layer, "request_method") {
        return joined(Some(method), find(layer, "request_uri"), " ").unwrap_or_default();
    }
    joined(
        find(layer, "response_code"),
        find(layer, "response_phrase"),
        " ",
    )
    .unwrap_or_default()
}

fn dns_info(layer: &PacketLayer) -> String {
    if let Some(name) = find(layer, "qry_name") {
        return match find(layer, "qry_type") {
            Some(kind) => format!("Query: {name} ({kind})"),
            None => format!("Query: {name}"),
        };
    }
    let Some(name) = find(layer, "resp_name") else {
        return String::new();
    };
    match (find(layer, "resp_type"), find(layer, "resp_data").or_else(|| find(layer, "a"))) {
        (Some(kind), Some(data)) => format!("Response: {name} ({kind}) = {data}"),
        _ => format!("Response: {name}"),
    }
}

fn port_info(layer: &PacketLayer) -> String {
    match (layer.get_display_field("srcport"), layer.get_display_field("dstport")) {
        (Some(src), Some(dst)) => format!("Port {src} -> {dst}"),
        _ => String::new(),
    }
}

fn icmp_info(layer: &PacketLayer) -> String {
    match (layer.get_display_field("type"), layer.get_display_field("code")) {
        (Some(kind), Some(code)) => format!("Type: {kind}, Code: {code}"),
        (Some(kind), None) => format!("Type: {kind}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::PacketSummary;
    use crate::field::Field;
    use crate::layer::{JsonLayer, XmlLayer};
    use crate::packet::{FrameInfo, Packet};
    use crate::parser::Encoding;

    #[test]
    fn summarizes_http_request() {
        let mut packet = Packet::new(Encoding::Json);
        packet.set_frame(FrameInfo {
            number: "7".into(),
            len: "320".into(),
            time_epoch: "0.5".into(),
            ..FrameInfo::default()
        });
        packet.push_layer(JsonLayer::new("frame", json!({})));
        packet.push_layer(JsonLayer::new(
            "ip",
            json!({"ip.src": "10.0.0.1", "ip.dst": "10.0.0.2"}),
        ));
        packet.push_layer(JsonLayer::new("tcp", json!({"tcp.srcport": "51000"})));
        packet.push_layer(JsonLayer::new(
            "http",
            json!({"GET / HTTP/1.1\\r\\n": {"http.request.method": "GET", "http.request.uri": "/"}}),
        ));

        let summary = PacketSummary::from_packet(&packet);
        assert_eq!(summary.number, Some(7));
        assert_eq!(summary.length, Some(320));
        assert!(
            summary
                .time
                .as_deref()
                .is_some_and(|time| time.starts_with("1970-01-01T00:00:00.5"))
        );
        assert_eq!(summary.source, "10.0.0.1");
        assert_eq!(summary.protocol, "http");
        assert_eq!(summary.info, "GET /");
        assert_eq!(summary.description(), "http 10.0.0.1 -> 10.0.0.2 GET /");
    }

    #[test]
    fn summarizes_udp_ports_from_xml() {
        let mut packet = Packet::new(Encoding::Xml);
        let mut ip = XmlLayer::new("ipv6");
        ip.add_field(Field::new("ipv6.src").with_show("fe80::1"));
        let mut udp = XmlLayer::new("udp");
        udp.add_field(Field::new("udp.srcport").with_show("5353"));
        udp.add_field(Field::new("udp.dstport").with_show("5353"));
        packet.push_layer(ip);
        packet.push_layer(udp);

        let summary = PacketSummary::from_packet(&packet);
        assert_eq!(summary.source, "fe80::1");
        assert_eq!(summary.destination, "");
        assert_eq!(summary.info, "Port 5353 -> 5353");
        assert_eq!(summary.number, None);
        assert_eq!(summary.time, None);
    }

    #[test]
    fn unknown_protocols_have_empty_info() {
        let mut packet = Packet::new(Encoding::Json);
        packet.push_layer(JsonLayer::new("arp", json!({"arp.opcode": "1"})));
        assert_eq!(PacketSummary::from_packet(&packet).info, "");
    }
}
