//! Listener, transport limits, and heartbeat settings.

use serde::{Deserialize, Serialize};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3001;

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// WebSocket URL handed out at registration. Derived from `port` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ws_url: Option<String>,
    /// Upgrades beyond this many live sockets are refused with 503.
    pub max_connections: usize,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            public_ws_url: None,
            max_connections: 1000,
            max_message_size: 16 * 1024 * 1024,
            outbound_queue: 1000,
        }
    }
}

impl ServerSettings {
    /// The endpoint clients should dial.
    pub fn ws_endpoint(&self) -> String {
        self.public_ws_url
            .clone()
            .unwrap_or_else(|| format!("ws://localhost:{}/ws", self.port))
    }
}

/// Transport liveness settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between server WebSocket pings.
    pub ping_interval_secs: u64,
    /// A connection silent for longer than this is closed as unresponsive.
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
        }
    }
}
