//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

mod server;
mod session;
mod store;

pub use server::*;
pub use session::*;
pub use store::*;

use relay_core::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 8080, "publicWsUrl": "wss://relay.example.com/ws" },
///   "session": { "ttlSecs": 3600, "roleConflict": "reject" },
///   "store": { "backend": "redis", "redisUrl": "redis://cache:6379" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and transport limits.
    pub server: ServerSettings,
    /// Session lifecycle.
    pub session: SessionSettings,
    /// Transport liveness.
    pub heartbeat: HeartbeatSettings,
    /// Registry and bus backend.
    pub store: StoreSettings,
    /// Backoff for relay-path publish and touch calls.
    pub retry: RetryConfig,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.session.ttl_secs == 0 {
            return Err(SettingsError::InvalidValue("session.ttlSecs must be > 0".into()));
        }
        if self.session.handshake_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "session.handshakeTimeoutMs must be > 0".into(),
            ));
        }
        if self.session.sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue("session.sweepIntervalMs must be > 0".into()));
        }
        if self.heartbeat.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.pingIntervalSecs must be > 0".into(),
            ));
        }
        if self.heartbeat.pong_timeout_secs < self.heartbeat.ping_interval_secs {
            return Err(SettingsError::InvalidValue(
                "heartbeat.pongTimeoutSecs must be >= pingIntervalSecs".into(),
            ));
        }
        if self.server.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue("server.outboundQueue must be > 0".into()));
        }
        if let Some(preset) = &self.session.preset {
            if preset.id.is_empty() || preset.token.is_empty() {
                return Err(SettingsError::InvalidValue(
                    "session.preset needs a non-empty id and token".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// One JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
