//! Server configuration.

use std::time::Duration;

use relay_core::RetryConfig;
use relay_settings::{RelaySettings, RoleConflictPolicy};

/// Runtime configuration for the relay server, resolved from settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// WebSocket URL handed out at registration.
    pub ws_endpoint: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
    /// Idle time after which a session expires.
    pub session_ttl_secs: u64,
    /// Time allowed for the `hello` frame.
    pub handshake_timeout: Duration,
    /// Interval of the expiry sweep.
    pub sweep_interval: Duration,
    /// Occupied-role policy.
    pub role_conflict: RoleConflictPolicy,
    /// How long `GET /api/logs` waits for the workstation.
    pub logs_request_timeout: Duration,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Silence after which a connection is closed as unresponsive.
    pub pong_timeout: Duration,
    /// Backoff for relay-path publish and touch.
    pub retry: RetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_endpoint: "ws://localhost/ws".into(),
            max_connections: 1000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            outbound_queue: 1000,
            session_ttl_secs: 7200,
            handshake_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            role_conflict: RoleConflictPolicy::Supersede,
            logs_request_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(90),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ws_endpoint: settings.server.ws_endpoint(),
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            outbound_queue: settings.server.outbound_queue,
            session_ttl_secs: settings.session.ttl_secs,
            handshake_timeout: Duration::from_millis(settings.session.handshake_timeout_ms),
            sweep_interval: Duration::from_millis(settings.session.sweep_interval_ms),
            role_conflict: settings.session.role_conflict,
            logs_request_timeout: Duration::from_millis(settings.session.logs_request_timeout_ms),
            ping_interval: Duration::from_secs(settings.heartbeat.ping_interval_secs),
            pong_timeout: Duration::from_secs(settings.heartbeat.pong_timeout_secs),
            retry: settings.retry.clone(),
        }
    }
}
