//! Handshake admission and departure.
//!
//! A connection is admitted once its `hello` names a live session, the
//! right token, and a valid role, and its role slot has been claimed in the
//! store. Everything after that (presence notices, TTL refresh) is best
//! effort and never fails the handshake.

use std::fmt;
use std::sync::Arc;

use relay_core::{BusEvent, CloseReason, ConnectionId, HandshakeError, Hello, Role, SessionId};
use relay_settings::RoleConflictPolicy;
use tracing::{debug, info, warn};

use super::router::RelayRouter;
use crate::bus::Subscription;
use crate::registry::{RoleClaim, SessionRegistry};
use crate::websocket::connection::ClientConnection;
use crate::websocket::hub::ConnectionHub;

/// A connection that passed the handshake.
pub struct JoinedSession {
    /// Session joined.
    pub session_id: SessionId,
    /// Role claimed.
    pub role: Role,
    /// Session channel, subscribed before presence was announced.
    pub subscription: Subscription,
    /// Holder of the opposite role at join time, if any.
    pub peer: Option<ConnectionId>,
}

impl fmt::Debug for JoinedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinedSession")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Admits connections into sessions and releases them on disconnect.
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    router: Arc<RelayRouter>,
    hub: Arc<ConnectionHub>,
    policy: RoleConflictPolicy,
}

impl Gateway {
    /// New gateway applying `policy` to occupied roles.
    pub fn new(
        registry: Arc<SessionRegistry>,
        router: Arc<RelayRouter>,
        hub: Arc<ConnectionHub>,
        policy: RoleConflictPolicy,
    ) -> Self {
        Self {
            registry,
            router,
            hub,
            policy,
        }
    }

    /// Validate `hello` and bind `conn` to the session role it names.
    pub async fn join(&self, conn: &Arc<ClientConnection>, hello: Hello) -> Result<JoinedSession, HandshakeError> {
        let role: Role = hello.role.parse().map_err(HandshakeError::InvalidRole)?;
        let session_id = SessionId::from(hello.session_id);
        let _ = self.registry.authenticate(&session_id, &hello.token).await?;

        // subscribe first so nothing published after the claim is missed
        let subscription = self.router.subscribe(&session_id).await?;

        let claim = self
            .registry
            .store()
            .claim_role(&session_id, role, &conn.id, self.policy)
            .await?;
        let superseded = match claim {
            RoleClaim::Claimed => None,
            RoleClaim::Occupied(holder) => {
                debug!(session_id = %session_id, %role, holder = %holder, "role occupied, rejecting");
                return Err(HandshakeError::RoleOccupied(role));
            }
            RoleClaim::Superseded(previous) => Some(previous),
        };
        // bound as soon as the slot is ours, so leave() releases it even if
        // the rest of the handshake is cut short
        conn.bind(session_id.clone(), role);

        if let Some(previous) = superseded {
            info!(session_id = %session_id, %role, previous = %previous, "role superseded");
            self.announce(&BusEvent::Superseded {
                session_id: session_id.clone(),
                role,
                conn_id: conn.id.clone(),
            })
            .await;
            self.announce(&BusEvent::PeerLeft {
                session_id: session_id.clone(),
                role,
                conn_id: previous,
            })
            .await;
        }

        if let Some(displaced) = self.hub.bind(&session_id, role, &conn.id) {
            let _ = displaced.close(CloseReason::Superseded);
        }

        self.announce(&BusEvent::PeerJoined {
            session_id: session_id.clone(),
            role,
            conn_id: conn.id.clone(),
        })
        .await;

        if let Err(e) = self.registry.touch(&session_id).await {
            warn!(session_id = %session_id, error = %e, "touch after join failed");
        }

        let peer = match self.registry.store().occupant(&session_id, role.opposite()).await {
            Ok(holder) => holder,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "peer presence unknown");
                None
            }
        };

        info!(session_id = %session_id, %role, conn_id = %conn.id, peer_present = peer.is_some(), "joined");
        Ok(JoinedSession {
            session_id,
            role,
            subscription,
            peer,
        })
    }

    /// Release `conn`'s role slot and tell the peer it left.
    ///
    /// Superseded connections no longer hold the slot, so nothing is
    /// announced for them. Killed sessions are gone already.
    pub async fn leave(&self, conn: &ClientConnection) {
        self.hub.remove(conn);
        let Some((session_id, role)) = conn.binding() else {
            return;
        };
        if conn.close_reason() == Some(CloseReason::SessionKilled) {
            return;
        }
        match self.registry.store().release_role(&session_id, role, &conn.id).await {
            Ok(true) => {
                self.announce(&BusEvent::PeerLeft {
                    session_id: session_id.clone(),
                    role,
                    conn_id: conn.id.clone(),
                })
                .await;
                info!(session_id = %session_id, %role, conn_id = %conn.id, "left");
            }
            Ok(false) => debug!(session_id = %session_id, %role, conn_id = %conn.id, "slot already taken over"),
            Err(e) => warn!(session_id = %session_id, %role, error = %e, "failed to release role"),
        }
    }

    async fn announce(&self, event: &BusEvent) {
        if let Err(e) = self.router.publish_event(event).await {
            warn!(session_id = %event.session_id(), error = %e, "presence event not published");
        }
    }
}
