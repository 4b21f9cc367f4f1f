//! Transport liveness: closes a socket that has gone quiet.
//!
//! The writer pings every interval and any inbound frame counts as a sign of
//! life. Nothing here touches session state; a quiet socket costs the client
//! its connection, never its session.

use std::sync::Arc;
use std::time::Duration;

use relay_core::CloseReason;
use tokio::time;
use tracing::warn;

use super::connection::ClientConnection;

/// When a quiet socket is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilencePolicy {
    /// How often the connection is checked.
    pub check_every: Duration,
    /// Silence that ends the connection.
    pub limit: Duration,
}

impl SilencePolicy {
    /// Policy checking every `check_every`, giving up after `limit`.
    pub fn new(check_every: Duration, limit: Duration) -> Self {
        Self { check_every, limit }
    }

    // the alive flag is cleared by each check and set again by inbound frames
    fn exceeded(&self, conn: &ClientConnection) -> bool {
        !conn.check_alive() && conn.last_seen_elapsed() >= self.limit
    }
}

/// Watch `conn` until it closes.
///
/// Returns `true` if this watcher closed it as `unresponsive`.
pub async fn watch_silence(conn: Arc<ClientConnection>, policy: SilencePolicy) -> bool {
    let mut tick = time::interval_at(time::Instant::now() + policy.check_every, policy.check_every);
    tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = conn.closed() => return false,
            _ = tick.tick() => {
                if !policy.exceeded(&conn) {
                    continue;
                }
                let silent_for = conn.last_seen_elapsed();
                if conn.close(CloseReason::Unresponsive) {
                    warn!(?silent_for, "client unresponsive, disconnecting");
                    return true;
                }
                return false;
            }
        }
    }
}
