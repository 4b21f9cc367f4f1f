//! In-process session store.
//!
//! Single-instance deployments and tests. Expiry is enforced lazily by
//! `touch`/`claim_role` and eagerly by [`purge_expired`](SessionStore::purge_expired).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::{ConnectionId, Role, SessionId, StoreError};
use relay_settings::RoleConflictPolicy;

use super::{RoleClaim, Session, SessionStore};

struct Record {
    session: Session,
    /// One slot per role, indexed by [`Role::index`].
    roles: [Option<ConnectionId>; 2],
}

/// Session store backed by a concurrent map.
///
/// Each operation holds the session's shard lock for its whole
/// read-modify-write, which makes it atomic per session.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Record>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn not_found(id: &SessionId) -> StoreError {
    StoreError::NotFound(id.to_string())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let _ = self.sessions.insert(
            session.id.clone(),
            Record {
                session,
                roles: [None, None],
            },
        );
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .get(id)
            .map(|record| record.session.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let mut record = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if record.session.is_expired(at) {
            return Err(StoreError::Expired(id.to_string()));
        }
        if at > record.session.last_active_at {
            record.session.last_active_at = at;
        }
        Ok(record.session.last_active_at)
    }

    async fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(id).is_some())
    }

    async fn claim_role(
        &self,
        id: &SessionId,
        role: Role,
        conn: &ConnectionId,
        policy: RoleConflictPolicy,
    ) -> Result<RoleClaim, StoreError> {
        let mut record = self.sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if record.session.is_expired(Utc::now()) {
            return Err(StoreError::Expired(id.to_string()));
        }
        let slot = &mut record.roles[role.index()];
        let claim = match slot.as_ref() {
            None => RoleClaim::Claimed,
            Some(holder) if holder == conn => RoleClaim::Claimed,
            Some(holder) => match policy {
                RoleConflictPolicy::Supersede => RoleClaim::Superseded(holder.clone()),
                RoleConflictPolicy::Reject => return Ok(RoleClaim::Occupied(holder.clone())),
            },
        };
        *slot = Some(conn.clone());
        Ok(claim)
    }

    async fn release_role(&self, id: &SessionId, role: Role, conn: &ConnectionId) -> Result<bool, StoreError> {
        let Some(mut record) = self.sessions.get_mut(id) else {
            return Ok(false);
        };
        let slot = &mut record.roles[role.index()];
        if slot.as_ref() == Some(conn) {
            *slot = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn occupant(&self, id: &SessionId, role: Role) -> Result<Option<ConnectionId>, StoreError> {
        Ok(self
            .sessions
            .get(id)
            .and_then(|record| record.roles[role.index()].clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<SessionId>, StoreError> {
        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.session.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        Ok(candidates
            .into_iter()
            .filter(|id| {
                self.sessions
                    .remove_if(id, |_, record| record.session.is_expired(now))
                    .is_some()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    async fn store_with(id: &str, ttl_secs: u64, now: DateTime<Utc>) -> MemorySessionStore {
        let store = MemorySessionStore::new();
        store
            .insert(Session::new(SessionId::from(id), "tok".into(), ttl_secs, now))
            .await
            .unwrap();
        store
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    #[tokio::test]
    async fn touch_is_monotonic() {
        let t0 = Utc::now();
        let store = store_with("s", 60, t0).await;
        let sid = SessionId::from("s");

        let t2 = t0 + TimeDelta::seconds(2);
        assert_eq!(store.touch(&sid, t2).await.unwrap(), t2);
        // an older timestamp never moves it back
        let t1 = t0 + TimeDelta::seconds(1);
        assert_eq!(store.touch(&sid, t1).await.unwrap(), t2);
        assert_eq!(store.get(&sid).await.unwrap().last_active_at, t2);
    }

    #[tokio::test]
    async fn touch_cannot_revive_expired_session() {
        let t0 = Utc::now();
        let store = store_with("s", 1, t0).await;
        let sid = SessionId::from("s");
        assert_matches!(
            store.touch(&sid, t0 + TimeDelta::seconds(5)).await,
            Err(StoreError::Expired(_))
        );
        assert_eq!(store.get(&sid).await.unwrap().last_active_at, t0);
    }

    #[tokio::test]
    async fn touch_unknown_is_not_found() {
        let store = MemorySessionStore::new();
        assert_matches!(
            store.touch(&SessionId::from("x"), Utc::now()).await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn claim_free_slot_then_reclaim_by_same_conn() {
        let store = store_with("s", 60, Utc::now()).await;
        let sid = SessionId::from("s");
        let policy = RoleConflictPolicy::Reject;
        assert_eq!(store.claim_role(&sid, Role::Phone, &conn("a"), policy).await.unwrap(), RoleClaim::Claimed);
        assert_eq!(store.claim_role(&sid, Role::Phone, &conn("a"), policy).await.unwrap(), RoleClaim::Claimed);
        assert_eq!(store.occupant(&sid, Role::Phone).await.unwrap(), Some(conn("a")));
        assert_eq!(store.occupant(&sid, Role::Workstation).await.unwrap(), None);
    }

    #[tokio::test]
    async fn supersede_replaces_holder() {
        let store = store_with("s", 60, Utc::now()).await;
        let sid = SessionId::from("s");
        let policy = RoleConflictPolicy::Supersede;
        let _ = store.claim_role(&sid, Role::Phone, &conn("a"), policy).await.unwrap();
        assert_eq!(
            store.claim_role(&sid, Role::Phone, &conn("b"), policy).await.unwrap(),
            RoleClaim::Superseded(conn("a"))
        );
        assert_eq!(store.occupant(&sid, Role::Phone).await.unwrap(), Some(conn("b")));
    }

    #[tokio::test]
    async fn reject_keeps_holder() {
        let store = store_with("s", 60, Utc::now()).await;
        let sid = SessionId::from("s");
        let policy = RoleConflictPolicy::Reject;
        let _ = store.claim_role(&sid, Role::Phone, &conn("a"), policy).await.unwrap();
        assert_eq!(
            store.claim_role(&sid, Role::Phone, &conn("b"), policy).await.unwrap(),
            RoleClaim::Occupied(conn("a"))
        );
        assert_eq!(store.occupant(&sid, Role::Phone).await.unwrap(), Some(conn("a")));
    }

    #[tokio::test]
    async fn release_is_compare_and_set() {
        let store = store_with("s", 60, Utc::now()).await;
        let sid = SessionId::from("s");
        let policy = RoleConflictPolicy::Supersede;
        let _ = store.claim_role(&sid, Role::Phone, &conn("a"), policy).await.unwrap();
        let _ = store.claim_role(&sid, Role::Phone, &conn("b"), policy).await.unwrap();
        // superseded holder cannot clear the new holder's slot
        assert!(!store.release_role(&sid, Role::Phone, &conn("a")).await.unwrap());
        assert!(store.release_role(&sid, Role::Phone, &conn("b")).await.unwrap());
        assert_eq!(store.occupant(&sid, Role::Phone).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_claims_yield_one_holder() {
        let store = std::sync::Arc::new(store_with("s", 60, Utc::now()).await);
        let sid = SessionId::from("s");
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let sid = sid.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_role(&sid, Role::Workstation, &conn(&format!("c{i}")), RoleConflictPolicy::Reject)
                    .await
                    .unwrap()
            }));
        }
        let mut claimed = 0;
        for h in handles {
            if h.await.unwrap() == RoleClaim::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn claim_on_missing_session_fails() {
        let store = MemorySessionStore::new();
        assert_matches!(
            store
                .claim_role(&SessionId::from("x"), Role::Phone, &conn("a"), RoleConflictPolicy::Supersede)
                .await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let t0 = Utc::now();
        let store = MemorySessionStore::new();
        store.insert(Session::new(SessionId::from("old"), "t".into(), 1, t0)).await.unwrap();
        store.insert(Session::new(SessionId::from("new"), "t".into(), 600, t0)).await.unwrap();

        let purged = store.purge_expired(t0 + TimeDelta::seconds(2)).await.unwrap();
        assert_eq!(purged, vec![SessionId::from("old")]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&SessionId::from("new")).await.is_ok());
    }
}
