//! `/health`: local counters plus a session store reachability probe.

use std::time::Instant;

use relay_core::SessionId;
use serde::Serialize;

use crate::registry::SessionStore;

/// Id that is never issued; looking it up only proves the store answers.
const PROBE_SESSION_ID: &str = "health-probe";

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving, store reachable.
    Ok,
    /// Serving, but the session store is failing. Handshakes will be refused.
    Degraded,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok` or `degraded`.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// WebSocket connections held by this instance.
    pub connections: usize,
    /// Sessions with at least one connection on this instance.
    pub active_sessions: usize,
    /// Whether the session store answered the probe.
    pub store_reachable: bool,
}

impl HealthReport {
    /// Assemble a report. `store_reachable` decides the status.
    pub fn new(started: Instant, connections: usize, active_sessions: usize, store_reachable: bool) -> Self {
        Self {
            status: if store_reachable {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            uptime_secs: started.elapsed().as_secs(),
            connections,
            active_sessions,
            store_reachable,
        }
    }

    /// Whether the status is `ok`.
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Whether `store` answers a lookup. A `NotFound` is an answer.
pub async fn probe_store(store: &dyn SessionStore) -> bool {
    match store.get(&SessionId::from(PROBE_SESSION_ID)).await {
        Ok(_) => true,
        Err(e) => e.is_missing(),
    }
}
