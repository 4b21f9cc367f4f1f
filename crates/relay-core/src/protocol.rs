//! Wire protocol for relay connections and the shared session channel.
//!
//! Three vocabularies live here:
//!
//! - [`ClientFrame`] / [`Hello`]: what a client may send on its socket
//! - [`ServerFrame`]: what the server sends back
//! - [`BusEvent`]: what server instances publish on a session's channel
//!
//! A relayed payload travels as an [`Envelope`]. The `frame` bus event and the
//! `frame` server frame serialize identically, so instances forward the bus
//! payload to the receiving socket without re-encoding it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HandshakeError;
use crate::ids::{ConnectionId, SessionId};
use crate::role::Role;

// ─────────────────────────────────────────────────────────────────────────────
// Client → server
// ─────────────────────────────────────────────────────────────────────────────

/// Only the `type` discriminator of an inbound JSON text frame.
#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn probe_type(text: &str) -> Option<String> {
    serde_json::from_str::<TypeProbe>(text).ok().and_then(|p| p.kind)
}

/// Handshake frame; must be the first message on a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Session the client wants to join.
    #[serde(rename = "sessionId", alias = "s")]
    pub session_id: String,
    /// Shared secret issued at registration.
    #[serde(alias = "t")]
    pub token: String,
    /// Claimed role, validated by the gateway.
    #[serde(alias = "r")]
    pub role: String,
}

impl Hello {
    /// Build a hello frame.
    pub fn new(session_id: impl Into<String>, token: impl Into<String>, role: Role) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
            role: role.as_str().to_owned(),
        }
    }

    /// Parse the first text frame of a connection.
    ///
    /// Fails with [`HandshakeError::NotHello`] when the frame is anything other
    /// than a `hello`, and [`HandshakeError::Malformed`] when it is a `hello`
    /// missing fields.
    pub fn parse(text: &str) -> Result<Self, HandshakeError> {
        if probe_type(text).as_deref() != Some("hello") {
            return Err(HandshakeError::NotHello);
        }
        serde_json::from_str(text).map_err(|e| HandshakeError::Malformed(e.to_string()))
    }

    /// Serialize as a `{"type":"hello",...}` text frame.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": "hello",
            "sessionId": self.session_id,
            "token": self.token,
            "role": self.role,
        })
        .to_string()
    }
}

/// Classification of a text frame received after the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// A repeated handshake; never relayed.
    Hello,
    /// `{"type":"hb"}` liveness/TTL refresh.
    Heartbeat,
    /// Anything else: an application message to relay verbatim.
    Payload,
}

impl ClientFrame {
    /// Classify an inbound text frame.
    pub fn classify(text: &str) -> Self {
        match probe_type(text).as_deref() {
            Some("hb") => Self::Heartbeat,
            Some("hello") => Self::Hello,
            _ => Self::Payload,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Raw application payload as received from a socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// A text frame, carried as-is.
    Text(String),
    /// A binary frame, carried base64-encoded.
    Binary(Vec<u8>),
}

/// Wrapper the relay adds around a forwarded payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Session the payload belongs to.
    #[serde(alias = "sid")]
    pub session_id: SessionId,
    /// Role of the sender.
    pub from_role: Role,
    /// Unix timestamp (seconds) at which the relay accepted the payload.
    pub at: i64,
    /// Text payload, or base64 of a binary payload.
    pub frame: String,
    /// Whether `frame` is base64-encoded binary.
    #[serde(default)]
    pub b64: bool,
}

impl Envelope {
    /// Wrap a payload sent by `from_role`.
    pub fn wrap(session_id: SessionId, from_role: Role, payload: Payload, at: DateTime<Utc>) -> Self {
        let (frame, b64) = match payload {
            Payload::Text(text) => (text, false),
            Payload::Binary(bytes) => (STANDARD.encode(bytes), true),
        };
        Self {
            session_id,
            from_role,
            at: at.timestamp(),
            frame,
            b64,
        }
    }

    /// Recover the original payload.
    pub fn payload(&self) -> Result<Payload, base64::DecodeError> {
        if self.b64 {
            STANDARD.decode(&self.frame).map(Payload::Binary)
        } else {
            Ok(Payload::Text(self.frame.clone()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → client
// ─────────────────────────────────────────────────────────────────────────────

/// Frames the server sends to a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Handshake accepted.
    HelloAck {
        /// Confirmed session.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// The given role now has a joined connection.
    PeerJoined {
        /// Role that joined.
        role: Role,
    },
    /// The given role's connection went away.
    PeerLeft {
        /// Role that left.
        role: Role,
    },
    /// A relayed payload from the opposite role.
    Frame(Envelope),
    /// Heartbeat acknowledgement.
    HbAck,
    /// The session was deleted or expired; the socket closes next.
    SessionKilled,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared channel
// ─────────────────────────────────────────────────────────────────────────────

/// Events published on a session's shared channel (`ch:{sessionId}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    /// Relayed payload; delivered to subscribers of the other role.
    Frame(Envelope),
    /// A connection joined `role`.
    PeerJoined {
        /// Session.
        #[serde(rename = "sessionId", alias = "sid")]
        session_id: SessionId,
        /// Role that joined.
        role: Role,
        /// Connection now holding the role.
        #[serde(rename = "connId")]
        conn_id: ConnectionId,
    },
    /// The connection holding `role` left.
    PeerLeft {
        /// Session.
        #[serde(rename = "sessionId", alias = "sid")]
        session_id: SessionId,
        /// Role that left.
        role: Role,
        /// Connection that held the role.
        #[serde(rename = "connId")]
        conn_id: ConnectionId,
    },
    /// `conn_id` took over `role`; any other holder of the role must close.
    Superseded {
        /// Session.
        #[serde(rename = "sessionId", alias = "sid")]
        session_id: SessionId,
        /// Contested role.
        role: Role,
        /// The new holder.
        #[serde(rename = "connId")]
        conn_id: ConnectionId,
    },
    /// The session is gone; every subscriber closes.
    SessionKilled {
        /// Session.
        #[serde(rename = "sessionId", alias = "sid")]
        session_id: SessionId,
    },
}

impl BusEvent {
    /// Session the event belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Frame(envelope) => &envelope.session_id,
            Self::PeerJoined { session_id, .. }
            | Self::PeerLeft { session_id, .. }
            | Self::Superseded { session_id, .. }
            | Self::SessionKilled { session_id } => session_id,
        }
    }

    /// Channel name for a session.
    pub fn channel(session_id: &SessionId) -> String {
        format!("ch:{session_id}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Close reasons
// ─────────────────────────────────────────────────────────────────────────────

/// Why the server closed a connection. Carried in the WebSocket close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Client left or server shut down.
    Normal,
    /// Transport liveness timeout.
    Unresponsive,
    /// Registry or bus outage.
    Unavailable,
    /// The handshake was rejected; retrying with the same credentials is pointless.
    HandshakeFailed,
    /// A newer connection took this role.
    Superseded,
    /// The session was deleted or expired.
    SessionKilled,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Unresponsive => 1001,
            Self::Unavailable => 1011,
            Self::HandshakeFailed => 4001,
            Self::Superseded => 4002,
            Self::SessionKilled => 4003,
        }
    }

    /// Close frame reason text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Unresponsive => "unresponsive",
            Self::Unavailable => "store-unavailable",
            Self::HandshakeFailed => "handshake-failed",
            Self::Superseded => "superseded",
            Self::SessionKilled => "session-killed",
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u16) -> Option<Self> {
        [
            Self::Normal,
            Self::Unresponsive,
            Self::Unavailable,
            Self::HandshakeFailed,
            Self::Superseded,
            Self::SessionKilled,
        ]
        .into_iter()
        .find(|r| r.code() == code)
    }
}
