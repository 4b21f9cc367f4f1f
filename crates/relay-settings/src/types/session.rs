//! Session lifecycle settings.

use serde::{Deserialize, Serialize};

/// What happens when a second connection claims an occupied role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleConflictPolicy {
    /// Last writer wins: the incumbent is closed as superseded.
    #[default]
    Supersede,
    /// The newcomer's handshake fails.
    Reject,
}

/// A fixed session created at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetSession {
    /// Session id.
    pub id: String,
    /// Session token.
    pub token: String,
}

/// Session lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Idle time after which a session expires.
    pub ttl_secs: u64,
    /// Time a new connection has to send its `hello`.
    pub handshake_timeout_ms: u64,
    /// Interval of the expiry sweep.
    pub sweep_interval_ms: u64,
    /// Occupied-role policy.
    pub role_conflict: RoleConflictPolicy,
    /// How long `GET /api/logs` waits for the workstation.
    pub logs_request_timeout_ms: u64,
    /// Session created at startup, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<PresetSession>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 7200,
            handshake_timeout_ms: 5000,
            sweep_interval_ms: 30_000,
            role_conflict: RoleConflictPolicy::default(),
            logs_request_timeout_ms: 5000,
            preset: None,
        }
    }
}
