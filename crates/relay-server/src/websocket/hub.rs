//! Local index of live connections on this instance.
//!
//! The hub only knows about sockets this process accepted. Cross-instance
//! state lives in the session store; the hub is what lets this instance
//! close its own sockets on supersede, kill, and shutdown.

use std::sync::Arc;

use dashmap::DashMap;
use relay_core::{CloseReason, ConnectionId, Role, SessionId};
use tracing::debug;

use super::connection::ClientConnection;

/// Live connections, plus which of them are bound to which session role.
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    sessions: DashMap<SessionId, [Option<ConnectionId>; 2]>,
}

impl ConnectionHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Forget a connection and, if it still holds one, its session slot.
    pub fn remove(&self, conn: &ClientConnection) {
        let _ = self.connections.remove(&conn.id);
        let Some((session_id, role)) = conn.binding() else {
            return;
        };
        if let Some(mut slots) = self.sessions.get_mut(&session_id) {
            let slot = &mut slots[role.index()];
            if slot.as_ref() == Some(&conn.id) {
                *slot = None;
            }
        }
        let _ = self
            .sessions
            .remove_if(&session_id, |_, slots| slots.iter().all(Option::is_none));
    }

    /// Record `conn` as the local holder of `role`. Returns the connection it
    /// displaced, if another local one held the role.
    pub fn bind(&self, session_id: &SessionId, role: Role, conn: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let previous = {
            let mut slots = self.sessions.entry(session_id.clone()).or_default();
            slots[role.index()].replace(conn.clone())
        };
        let previous = previous.filter(|prev| prev != conn)?;
        debug!(session_id = %session_id, %role, previous = %previous, "local role holder replaced");
        self.connections.get(&previous).map(|c| Arc::clone(c.value()))
    }

    /// Local holder of a role.
    pub fn holder(&self, session_id: &SessionId, role: Role) -> Option<Arc<ClientConnection>> {
        let id = self.sessions.get(session_id)?[role.index()].clone()?;
        self.connections.get(&id).map(|c| Arc::clone(c.value()))
    }

    /// Every live connection bound to a session on this instance.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<ClientConnection>> {
        let ids: Vec<ConnectionId> = match self.sessions.get(session_id) {
            Some(slots) => slots.iter().flatten().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|c| Arc::clone(c.value())))
            .collect()
    }

    /// Accepted connections, joined or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sessions with at least one local connection.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ids of sessions with at least one local connection.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Close every connection (shutdown).
    pub fn close_all(&self, reason: CloseReason) {
        let all: Vec<Arc<ClientConnection>> = self.connections.iter().map(|c| Arc::clone(c.value())).collect();
        for conn in all {
            let _ = conn.close(reason);
        }
    }
}
