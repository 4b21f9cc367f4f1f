//! Session termination: explicit deletion and TTL expiry.

use std::sync::Arc;

use metrics::counter;
use relay_core::{BusEvent, CloseReason, ServerFrame, SessionId, StoreError};
use tracing::{info, warn};

use super::router::RelayRouter;
use crate::metrics::SESSIONS_KILLED_TOTAL;
use crate::registry::SessionRegistry;
use crate::websocket::hub::ConnectionHub;

/// Why a session is being terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillCause {
    /// `DELETE /api/session/{id}`.
    Explicit,
    /// Idle timeout elapsed.
    Expired,
}

impl KillCause {
    /// Metric label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Expired => "expired",
        }
    }
}

/// Tears sessions down everywhere: store, shared channel, local sockets.
#[derive(Clone)]
pub struct Terminator {
    registry: Arc<SessionRegistry>,
    router: Arc<RelayRouter>,
    hub: Arc<ConnectionHub>,
}

impl Terminator {
    /// New terminator.
    pub fn new(registry: Arc<SessionRegistry>, router: Arc<RelayRouter>, hub: Arc<ConnectionHub>) -> Self {
        Self { registry, router, hub }
    }

    /// Terminate a session.
    ///
    /// An explicit kill of an unknown or expired session fails with a
    /// missing-session error. Every connection bound to the session, on any
    /// instance, receives `session-killed` and closes.
    ///
    /// The record is deleted before the notice goes out. A handshake racing
    /// the kill either subscribed in time to see the notice or fails its
    /// role claim on the missing record.
    pub async fn kill(&self, session_id: &SessionId, cause: KillCause) -> Result<(), StoreError> {
        if cause == KillCause::Explicit {
            let _ = self.registry.lookup(session_id).await?;
        }
        let _ = self.registry.remove(session_id).await?;

        let event = BusEvent::SessionKilled {
            session_id: session_id.clone(),
        };
        if let Err(e) = self.router.publish_event(&event).await {
            warn!(session_id = %session_id, error = %e, "kill notice not published, closing local connections only");
        }

        let notice = ServerFrame::SessionKilled;
        for conn in self.hub.session_connections(session_id) {
            let _ = conn.terminate(CloseReason::SessionKilled, Some(&notice));
        }

        counter!(SESSIONS_KILLED_TOTAL, "cause" => cause.label()).increment(1);
        info!(session_id = %session_id, cause = cause.label(), "session terminated");
        Ok(())
    }
}
