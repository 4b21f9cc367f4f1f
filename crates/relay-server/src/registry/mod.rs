//! Session Registry.
//!
//! Sessions live in a [`SessionStore`]: the single source of truth for
//! existence, expiry, and role occupancy. Nothing above this layer caches a
//! session beyond one operation.
//!
//! Each session has one fixed slot per [`Role`]. A slot is claimed and
//! released with an atomic compare-and-set inside the store, which is what
//! keeps "at most one joined connection per (session, role)" true under
//! concurrent handshakes on different instances.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use relay_core::{ConnectionId, HandshakeError, Role, SessionId, StoreError, generate_token};
use relay_settings::RoleConflictPolicy;
use tracing::{debug, info};

pub use memory::MemorySessionStore;

/// A pairing session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Routing key.
    pub id: SessionId,
    /// Shared secret both peers present at handshake.
    pub token: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last handshake, relayed payload, or heartbeat.
    pub last_active_at: DateTime<Utc>,
    /// Idle timeout.
    pub ttl_secs: u64,
}

impl Session {
    /// A fresh session, active as of `now`.
    pub fn new(id: SessionId, token: String, ttl_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            token,
            created_at: now,
            last_active_at: now,
            ttl_secs,
        }
    }

    /// When the session expires if nothing touches it.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.last_active_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the idle timeout has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Constant-time token comparison.
    pub fn token_matches(&self, candidate: &str) -> bool {
        let a = self.token.as_bytes();
        let b = candidate.as_bytes();
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

/// Outcome of claiming a role slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleClaim {
    /// The slot was free or already held by the claimant.
    Claimed,
    /// The slot was taken over from the given connection.
    Superseded(ConnectionId),
    /// The slot is held by the given connection and the policy rejects newcomers.
    Occupied(ConnectionId),
}

/// TTL-capable session storage.
///
/// Implementations must make `touch`, `claim_role`, and `release_role`
/// atomic per session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session with its TTL.
    async fn insert(&self, session: Session) -> Result<(), StoreError>;

    /// Fetch a session. Expiry is judged by the caller.
    async fn get(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Advance `lastActiveAt` to `at` (never backwards) and extend the TTL.
    /// Returns the effective `lastActiveAt`. An expired session is not revived.
    async fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError>;

    /// Delete a session and its role slots. Returns whether it existed.
    async fn remove(&self, id: &SessionId) -> Result<bool, StoreError>;

    /// Compare-and-set the role slot under `policy`.
    async fn claim_role(
        &self,
        id: &SessionId,
        role: Role,
        conn: &ConnectionId,
        policy: RoleConflictPolicy,
    ) -> Result<RoleClaim, StoreError>;

    /// Clear the role slot only if `conn` still holds it.
    async fn release_role(&self, id: &SessionId, role: Role, conn: &ConnectionId) -> Result<bool, StoreError>;

    /// Current holder of a role slot; `None` for a free slot or a missing session.
    async fn occupant(&self, id: &SessionId, role: Role) -> Result<Option<ConnectionId>, StoreError>;

    /// Remove sessions expired at `now` and return their ids. Stores that
    /// evict natively may return an empty list.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<SessionId>, StoreError>;
}

/// Registry facade over a [`SessionStore`].
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    ttl_secs: u64,
}

impl SessionRegistry {
    /// Create a registry issuing sessions with `ttl_secs` idle timeout.
    pub fn new(store: Arc<dyn SessionStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Configured idle timeout.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Mint a session with a fresh id and token.
    pub async fn create(&self) -> Result<Session, StoreError> {
        self.create_with(SessionId::new(), generate_token()).await
    }

    /// Store a session with caller-chosen credentials.
    pub async fn create_with(&self, id: SessionId, token: String) -> Result<Session, StoreError> {
        let session = Session::new(id, token, self.ttl_secs, Utc::now());
        self.store.insert(session.clone()).await?;
        info!(session_id = %session.id, ttl_secs = self.ttl_secs, "session created");
        Ok(session)
    }

    /// Fetch a live session. Expired sessions surface as [`StoreError::Expired`].
    pub async fn lookup(&self, id: &SessionId) -> Result<Session, StoreError> {
        let session = self.store.get(id).await?;
        if session.is_expired(Utc::now()) {
            debug!(session_id = %id, "lookup of expired session");
            return Err(StoreError::Expired(id.to_string()));
        }
        Ok(session)
    }

    /// Validate credentials for a handshake or an ingest call.
    pub async fn authenticate(&self, id: &SessionId, token: &str) -> Result<Session, HandshakeError> {
        let session = self.lookup(id).await?;
        if session.token_matches(token) {
            Ok(session)
        } else {
            Err(HandshakeError::BadToken)
        }
    }

    /// Refresh `lastActiveAt` and the TTL.
    pub async fn touch(&self, id: &SessionId) -> Result<DateTime<Utc>, StoreError> {
        self.store.touch(id, Utc::now()).await
    }

    /// Delete a session. Returns whether it existed.
    pub async fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.store.remove(id).await
    }
}
