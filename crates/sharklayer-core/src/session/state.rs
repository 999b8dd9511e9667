//! Coarse TCP lifecycle derived from observed flags.
//!
//! Sequence numbers, retransmissions and simultaneous close are not
//! modelled; nothing produces `fin_wait_2`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::layer::{FieldValue, Layer, parse_int_text};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    New,
    SynSent,
    SynReceived,
    Established,
    #[serde(rename = "fin_wait_1")]
    FinWait1,
    #[serde(rename = "fin_wait_2")]
    FinWait2,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::SynSent => "syn_sent",
            SessionState::SynReceived => "syn_received",
            SessionState::Established => "established",
            SessionState::FinWait1 => "fin_wait_1",
            SessionState::FinWait2 => "fin_wait_2",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    /// Next state after a segment carrying `flags`.
    ///
    /// # Examples
    /// ```
    /// use sharklayer_core::{SessionState, TcpFlags};
    ///
    /// let syn = TcpFlags { syn: true, ..TcpFlags::default() };
    /// let syn_ack = TcpFlags { syn: true, ack: true, ..TcpFlags::default() };
    /// let state = SessionState::New.advance(syn);
    /// assert_eq!(state, SessionState::SynSent);
    /// assert_eq!(state.advance(syn_ack), SessionState::SynReceived);
    /// ```
    pub fn advance(self, flags: TcpFlags) -> SessionState {
        use SessionState::*;

        if flags.rst {
            return Closed;
        }
        match self {
            _ if flags.syn && !flags.ack => SynSent,
            _ if flags.syn => SynReceived,
            SynReceived if flags.ack => Established,
            FinWait1 | FinWait2 if flags.fin => Closing,
            Closing | Closed if flags.fin => self,
            _ if flags.fin => FinWait1,
            state => state,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FIN: i64 = 0x01;
const SYN: i64 = 0x02;
const RST: i64 = 0x04;
const ACK: i64 = 0x10;

/// The flags that drive [`SessionState::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub fn from_bits(bits: i64) -> Self {
        Self {
            syn: bits & SYN != 0,
            ack: bits & ACK != 0,
            fin: bits & FIN != 0,
            rst: bits & RST != 0,
        }
    }

    /// Flag words as the dissector prints them: `SYN, ACK`, `FIN, ACK`, `RST`.
    pub fn from_words(text: &str) -> Option<Self> {
        let upper = text.to_ascii_uppercase();
        let flags = Self {
            syn: upper.contains("SYN"),
            ack: upper.contains("ACK"),
            fin: upper.contains("FIN"),
            rst: upper.contains("RST") || upper.contains("RESET"),
        };
        (flags != Self::default()).then_some(flags)
    }

    /// Read the flags of a tcp layer in whatever shape the encoding produced.
    ///
    /// Tries the `flags` value as a bitmask or flag words first, then the
    /// per-flag subfields.
    pub fn from_layer(layer: &dyn Layer) -> Option<Self> {
        let value = layer.get_display_field("flags");
        if let Some(flags) = value.as_ref().and_then(from_value) {
            return Some(flags);
        }
        if let Some(flags) = value.as_ref().and_then(from_subfield_value) {
            return Some(flags);
        }
        let tree = layer.get_display_field("flags_tree");
        if let Some(tree) = tree.as_ref().and_then(FieldValue::as_layer) {
            return from_subfields(|name| tree.get_field(name));
        }
        from_subfields(|name| {
            layer
                .get_display_field(&format!("flags.{name}"))
                .or_else(|| layer.get_display_field(&format!("flags_{name}")))
        })
    }
}

fn from_value(value: &FieldValue) -> Option<TcpFlags> {
    match value {
        FieldValue::Int(bits) => Some(TcpFlags::from_bits(*bits)),
        FieldValue::Text(text) => from_text(text),
        FieldValue::Container(container) => {
            let main = container.main_field()?;
            from_text(main.default_value()).or_else(|| {
                main.showname_value().and_then(TcpFlags::from_words)
            })
        }
        FieldValue::MultiField(multi) => multi.value().and_then(from_value),
        FieldValue::List(items) => items.first().and_then(from_value),
        FieldValue::Layer(layer) => layer.value().as_ref().and_then(from_value),
        FieldValue::Float(_) | FieldValue::Bool(_) => None,
    }
}

fn from_text(text: &str) -> Option<TcpFlags> {
    match parse_int_text(text) {
        Some(bits) => Some(TcpFlags::from_bits(bits)),
        None => TcpFlags::from_words(text),
    }
}

/// Flags spread over subfields of the `flags` value itself.
fn from_subfield_value(value: &FieldValue) -> Option<TcpFlags> {
    match value {
        FieldValue::MultiField(multi) => from_subfields(|name| multi.get_field(name)),
        FieldValue::Layer(layer) => from_subfields(|name| layer.get_field(name)),
        _ => None,
    }
}

fn from_subfields(lookup: impl Fn(&str) -> Option<FieldValue>) -> Option<TcpFlags> {
    let flag = |names: &[&str]| -> Option<bool> {
        names
            .iter()
            .find_map(|name| lookup(name))
            .and_then(|value| value.as_bool())
    };
    let syn = flag(&["syn"]);
    let ack = flag(&["ack"]);
    let fin = flag(&["fin"]);
    let rst = flag(&["reset", "rst"]);
    if syn.is_none() && ack.is_none() && fin.is_none() && rst.is_none() {
        return None;
    }
    Some(TcpFlags {
        syn: syn.unwrap_or(false),
        ack: ack.unwrap_or(false),
        fin: fin.unwrap_or(false),
        rst: rst.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{SessionState, TcpFlags};
    use crate::field::Field;
    use crate::layer::{EkLayer, JsonLayer, XmlLayer};

    fn flags(syn: bool, ack: bool, fin: bool, rst: bool) -> TcpFlags {
        TcpFlags { syn, ack, fin, rst }
    }

    #[test]
    fn handshake_reaches_established() {
        let state = SessionState::New
            .advance(flags(true, false, false, false))
            .advance(flags(true, true, false, false))
            .advance(flags(false, true, false, false));
        assert_eq!(state, SessionState::Established);
    }

    #[test]
    fn teardown_and_reset() {
        let state = SessionState::Established.advance(flags(false, true, true, false));
        assert_eq!(state, SessionState::FinWait1);
        let state = state.advance(flags(false, true, true, false));
        assert_eq!(state, SessionState::Closing);
        assert_eq!(state.advance(flags(false, true, true, false)), SessionState::Closing);
        assert_eq!(
            SessionState::Established.advance(flags(false, true, false, true)),
            SessionState::Closed
        );
    }

    #[test]
    fn plain_ack_outside_handshake_keeps_state() {
        assert_eq!(
            SessionState::New.advance(flags(false, true, false, false)),
            SessionState::New
        );
        assert_eq!(
            SessionState::Established.advance(flags(false, true, false, false)),
            SessionState::Established
        );
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(SessionState::FinWait1.to_string(), "fin_wait_1");
        assert_eq!(
            serde_json::to_string(&SessionState::SynReceived).unwrap(),
            "\"syn_received\""
        );
        assert_eq!(
            serde_json::to_string(&SessionState::FinWait2).unwrap(),
            "\"fin_wait_2\""
        );
    }

    #[test]
    fn flags_from_hex_text_and_words() {
        let layer = JsonLayer::new("tcp", json!({"tcp.flags": "0x0012"}));
        assert_eq!(TcpFlags::from_layer(&layer), Some(flags(true, true, false, false)));
        let layer = JsonLayer::new("tcp", json!({"tcp.flags": "SYN"}));
        assert_eq!(TcpFlags::from_layer(&layer), Some(flags(true, false, false, false)));
        let layer = JsonLayer::new("tcp", json!({"tcp.flags": "FIN, ACK"}));
        assert_eq!(TcpFlags::from_layer(&layer), Some(flags(false, true, true, false)));
    }

    #[test]
    fn flags_from_json_tree() {
        let layer = JsonLayer::new(
            "tcp",
            json!({"tcp.flags_tree": {"tcp.flags.syn": "1", "tcp.flags.ack": "0", "tcp.flags.reset": "0"}}),
        );
        assert_eq!(TcpFlags::from_layer(&layer), Some(flags(true, false, false, false)));
    }

    #[test]
    fn flags_from_ek_and_xml() {
        let fields: BTreeMap<_, _> = [
            ("tcp_tcp_flags_syn".to_string(), json!("1")),
            ("tcp_tcp_flags_ack".to_string(), json!("1")),
        ]
        .into_iter()
        .collect();
        let ek = EkLayer::new("tcp", fields);
        assert_eq!(TcpFlags::from_layer(&ek), Some(flags(true, true, false, false)));

        let mut xml = XmlLayer::new("tcp");
        xml.add_field(Field::new("tcp.flags").with_show("0x0004").with_raw_value("0004"));
        assert_eq!(TcpFlags::from_layer(&xml), Some(flags(false, false, false, true)));
    }

    #[test]
    fn no_flags_means_none() {
        let layer = JsonLayer::new("tcp", json!({"tcp.srcport": "80"}));
        assert_eq!(TcpFlags::from_layer(&layer), None);
    }
}
