//! Session activity tracking and the expiry sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use relay_core::{RetryConfig, SessionId, StoreError, retry_with_backoff};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::termination::{KillCause, Terminator};
use crate::metrics::HEARTBEATS_TOTAL;
use crate::registry::SessionRegistry;
use crate::websocket::hub::ConnectionHub;

/// Refreshes `lastActiveAt` on relayed traffic and heartbeats.
#[derive(Clone)]
pub struct Liveness {
    registry: Arc<SessionRegistry>,
    retry: RetryConfig,
}

impl Liveness {
    /// New tracker.
    pub fn new(registry: Arc<SessionRegistry>, retry: RetryConfig) -> Self {
        Self { registry, retry }
    }

    /// Extend the session TTL. Transient store failures are retried.
    pub async fn touch(&self, session_id: &SessionId) -> Result<DateTime<Utc>, StoreError> {
        let registry = &self.registry;
        retry_with_backoff(&self.retry, "session.touch", move || registry.touch(session_id)).await
    }

    /// A client heartbeat.
    pub async fn heartbeat(&self, session_id: &SessionId) -> Result<DateTime<Utc>, StoreError> {
        counter!(HEARTBEATS_TOTAL).increment(1);
        self.touch(session_id).await
    }
}

/// Periodically terminates expired sessions.
pub struct ExpirySweeper {
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    terminator: Terminator,
    interval: Duration,
}

impl ExpirySweeper {
    /// New sweeper checking every `interval`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        terminator: Terminator,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            hub,
            terminator,
            interval,
        }
    }

    /// Sweep until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX), "expiry sweeper started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let killed = self.sweep_once().await;
                    if killed > 0 {
                        debug!(killed, "expiry sweep");
                    }
                }
            }
        }
        info!("expiry sweeper stopped");
    }

    /// One pass. Returns how many sessions were terminated.
    ///
    /// Covers sessions the store purges itself and, for stores that expire
    /// keys natively, sessions that still have connections on this instance.
    pub async fn sweep_once(&self) -> usize {
        let mut killed = 0;

        match self.registry.store().purge_expired(Utc::now()).await {
            Ok(expired) => {
                for session_id in expired {
                    if self.expire(&session_id).await {
                        killed += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "expiry purge failed"),
        }

        for session_id in self.hub.session_ids() {
            // already being torn down
            if self.hub.session_connections(&session_id).iter().all(|c| c.is_closing()) {
                continue;
            }
            match self.registry.lookup(&session_id).await {
                Err(e) if e.is_missing() => {
                    if self.expire(&session_id).await {
                        killed += 1;
                    }
                }
                Err(e) => warn!(session_id = %session_id, error = %e, "expiry check failed"),
                Ok(_) => {}
            }
        }

        killed
    }

    async fn expire(&self, session_id: &SessionId) -> bool {
        match self.terminator.kill(session_id, KillCause::Expired).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to terminate expired session");
                false
            }
        }
    }
}
