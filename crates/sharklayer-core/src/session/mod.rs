//! Conversation tracking on top of parsed packets.
//!
//! Lock discipline: the tracker's map lock covers only lookup and insert and
//! is released before the session's own lock is taken. A session's lock
//! guards its packet list, time bounds and state.

pub mod error;
pub mod key;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::packet::Packet;
use crate::timestamp::{ts_to_rfc3339, update_ts_bounds};

pub use error::SessionError;
pub use key::{SessionKey, extract_session_key};
pub use state::{SessionState, TcpFlags};

/// One bidirectional conversation.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    inner: RwLock<SessionInner>,
}

#[derive(Debug, Default)]
struct SessionInner {
    packets: Vec<Arc<Packet>>,
    started: Option<f64>,
    ended: Option<f64>,
    state: SessionState,
}

impl Session {
    /// A session in state `new`; `key` is stored as given.
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            inner: RwLock::new(SessionInner::default()),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Append a packet, widen the time bounds and apply its TCP flags.
    pub fn add_packet(&self, packet: Arc<Packet>) {
        let ts = packet.sniff_timestamp().ok();
        let flags = packet
            .get_layer("tcp")
            .and_then(|layer| TcpFlags::from_layer(layer));

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        update_ts_bounds(&mut inner.started, &mut inner.ended, ts);
        if let Some(flags) = flags {
            inner.state = inner.state.advance(flags);
        }
        inner.packets.push(packet);
    }

    pub fn packet_count(&self) -> usize {
        self.inner.read().packets.len()
    }

    /// Packets in arrival order.
    pub fn packets(&self) -> Vec<Arc<Packet>> {
        self.inner.read().packets.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    /// Earliest sniff time seen, as epoch seconds.
    pub fn started(&self) -> Option<f64> {
        self.inner.read().started
    }

    /// Latest sniff time seen, as epoch seconds.
    pub fn ended(&self) -> Option<f64> {
        self.inner.read().ended
    }

    /// Seconds between the first and last timestamp; zero when unknown.
    pub fn duration(&self) -> f64 {
        let inner = self.inner.read();
        match (inner.started, inner.ended) {
            (Some(started), Some(ended)) => ended - started,
            _ => 0.0,
        }
    }

    /// Consistent copy of the session's current values.
    pub fn snapshot(&self) -> SessionSummary {
        let inner = self.inner.read();
        SessionSummary {
            key: self.key.to_string(),
            protocol: self.key.protocol.clone(),
            endpoint_a: endpoint(&self.key.src_ip, &self.key.src_port),
            endpoint_b: endpoint(&self.key.dst_ip, &self.key.dst_port),
            state: inner.state,
            packets: inner.packets.len() as u64,
            started: ts_to_rfc3339(inner.started),
            ended: ts_to_rfc3339(inner.ended),
            duration_s: match (inner.started, inner.ended) {
                (Some(started), Some(ended)) => Some(ended - started),
                _ => None,
            },
        }
    }
}

fn endpoint(ip: &str, port: &str) -> String {
    let host = if ip.contains(':') {
        format!("[{ip}]")
    } else {
        ip.to_string()
    };
    if port.is_empty() {
        host
    } else {
        format!("{host}:{port}")
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Normalized key in `proto:src:sport-dst:dport` form.
    pub key: String,
    pub protocol: String,
    pub endpoint_a: String,
    pub endpoint_b: String,
    pub state: SessionState,
    pub packets: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

/// Sessions keyed by their normalized key. Entries are never evicted.
///
/// # Examples
/// ```
/// use sharklayer_core::{Encoding, ParserOptions, SessionTracker, parse_packets};
///
/// let input = br#"[
///   {"_source": {"layers": {"ip": {"ip.src": "10.0.0.1", "ip.dst": "10.0.0.2"},
///     "udp": {"udp.srcport": "5000", "udp.dstport": "53"}}}},
///   {"_source": {"layers": {"ip": {"ip.src": "10.0.0.2", "ip.dst": "10.0.0.1"},
///     "udp": {"udp.srcport": "53", "udp.dstport": "5000"}}}}
/// ]"#;
/// let tracker = SessionTracker::new();
/// tracker.add_packets(parse_packets(Encoding::Json, input, &ParserOptions::default())?);
/// assert_eq!(tracker.len(), 1);
/// assert_eq!(tracker.sessions()[0].packet_count(), 2);
/// # Ok::<(), sharklayer_core::ParseError>(())
/// ```
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a packet to its session, creating the session on first sight.
    ///
    /// Packets without usable addresses are skipped and `None` is returned.
    pub fn add_packet(&self, packet: impl Into<Arc<Packet>>) -> Option<Arc<Session>> {
        let packet = packet.into();
        let key = match extract_session_key(&packet) {
            Ok(key) => key.normalized(),
            Err(err) => {
                debug!(frame = %packet.frame().number, error = %err, "packet not tracked");
                return None;
            }
        };
        let session = self.session_for(key);
        session.add_packet(packet);
        Some(session)
    }

    pub fn add_packets<I>(&self, packets: I)
    where
        I: IntoIterator,
        I::Item: Into<Arc<Packet>>,
    {
        for packet in packets {
            self.add_packet(packet);
        }
    }

    fn session_for(&self, key: SessionKey) -> Arc<Session> {
        let id = key.to_string();
        if let Some(session) = self.sessions.read().get(&id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write();
        Arc::clone(
            sessions
                .entry(id)
                .or_insert_with(|| Arc::new(Session::new(key))),
        )
    }

    /// Look up a session in either direction.
    pub fn session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let id = key.normalized().to_string();
        self.sessions.read().get(&id).cloned()
    }

    /// All sessions, ordered by key.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read();
        let mut ids: Vec<&String> = sessions.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| sessions.get(id).cloned())
            .collect()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions()
            .iter()
            .map(|session| session.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
