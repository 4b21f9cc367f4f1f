//! Redis-backed session store for multi-instance deployments.
//!
//! Layout per session:
//!
//! - `sess:{id}`: hash `token`, `createdAt`, `lastActiveAt` (unix ms), `ttlSecs`
//! - `sess:{id}:roles`: hash `workstation` / `phone` → connection id
//!
//! Both keys carry the session TTL as a native Redis expiry, refreshed on
//! every touch. Read-modify-write operations run as Lua scripts so they are
//! atomic across instances.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use relay_core::{ConnectionId, Role, SessionId, StoreError};
use relay_settings::RoleConflictPolicy;
use tracing::info;

use super::{RoleClaim, Session, SessionStore};

const TOUCH_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
local last = tonumber(redis.call('HGET', KEYS[1], 'lastActiveAt'))
local at = tonumber(ARGV[1])
if at > last then
  last = at
  redis.call('HSET', KEYS[1], 'lastActiveAt', last)
end
local ttl = tonumber(redis.call('HGET', KEYS[1], 'ttlSecs'))
redis.call('EXPIRE', KEYS[1], ttl)
if redis.call('EXISTS', KEYS[2]) == 1 then redis.call('EXPIRE', KEYS[2], ttl) end
return last
";

// Returns {code, previous holder}: 0 claimed, 1 superseded, 2 occupied, -1 missing.
const CLAIM_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return {-1, ''} end
local holder = redis.call('HGET', KEYS[2], ARGV[1])
local code = 0
if holder and holder ~= ARGV[2] then
  if ARGV[3] == 'reject' then return {2, holder} end
  code = 1
else
  holder = ''
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
local ttl = redis.call('TTL', KEYS[1])
if ttl > 0 then redis.call('EXPIRE', KEYS[2], ttl) end
return {code, holder}
";

const RELEASE_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
  return redis.call('HDEL', KEYS[1], ARGV[1])
end
return 0
";

fn session_key(id: &SessionId) -> String {
    format!("sess:{id}")
}

fn roles_key(id: &SessionId) -> String {
    format!("sess:{id}:roles")
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// [`SessionStore`] over a shared Redis.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    touch: Script,
    claim: Script,
    release: Script,
}

impl RedisSessionStore {
    /// Connect to `url`. The connection manager reconnects on its own.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!(url, "redis session store connected");
        Ok(Self {
            conn,
            touch: Script::new(TOUCH_SCRIPT),
            claim: Script::new(CLAIM_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let key = session_key(&session.id);
        let ttl = i64::try_from(session.ttl_secs).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("token", session.token.clone()),
                    ("createdAt", session.created_at.timestamp_millis().to_string()),
                    ("lastActiveAt", session.last_active_at.timestamp_millis().to_string()),
                    ("ttlSecs", session.ttl_secs.to_string()),
                ],
            )
            .ignore()
            .expire(&key, ttl)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(session_key(id)).await.map_err(unavailable)?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let millis = |name: &str| fields.get(name).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        Ok(Session {
            id: id.clone(),
            token: fields.get("token").cloned().unwrap_or_default(),
            created_at: from_millis(millis("createdAt")),
            last_active_at: from_millis(millis("lastActiveAt")),
            ttl_secs: fields.get("ttlSecs").and_then(|v| v.parse().ok()).unwrap_or(0),
        })
    }

    async fn touch(&self, id: &SessionId, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let mut conn = self.conn.clone();
        let last: i64 = self
            .touch
            .key(session_key(id))
            .key(roles_key(id))
            .arg(at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        if last < 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(from_millis(last))
    }

    async fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u32 = conn
            .del(vec![session_key(id), roles_key(id)])
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn claim_role(
        &self,
        id: &SessionId,
        role: Role,
        conn_id: &ConnectionId,
        policy: RoleConflictPolicy,
    ) -> Result<RoleClaim, StoreError> {
        let policy = match policy {
            RoleConflictPolicy::Supersede => "supersede",
            RoleConflictPolicy::Reject => "reject",
        };
        let mut conn = self.conn.clone();
        let (code, holder): (i64, String) = self
            .claim
            .key(session_key(id))
            .key(roles_key(id))
            .arg(role.as_str())
            .arg(conn_id.as_str())
            .arg(policy)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        match code {
            0 => Ok(RoleClaim::Claimed),
            1 => Ok(RoleClaim::Superseded(ConnectionId::from(holder))),
            2 => Ok(RoleClaim::Occupied(ConnectionId::from(holder))),
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn release_role(&self, id: &SessionId, role: Role, conn_id: &ConnectionId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release
            .key(roles_key(id))
            .arg(role.as_str())
            .arg(conn_id.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(released > 0)
    }

    async fn occupant(&self, id: &SessionId, role: Role) -> Result<Option<ConnectionId>, StoreError> {
        let mut conn = self.conn.clone();
        let holder: Option<String> = conn.hget(roles_key(id), role.as_str()).await.map_err(unavailable)?;
        Ok(holder.map(ConnectionId::from))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<Vec<SessionId>, StoreError> {
        // keys expire natively; the sweeper catches sessions with local connections
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let id = SessionId::from("abc");
        assert_eq!(session_key(&id), "sess:abc");
        assert_eq!(roles_key(&id), "sess:abc:roles");
    }

    #[test]
    fn millis_conversion() {
        let at = from_millis(1_700_000_000_123);
        assert_eq!(at.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(from_millis(i64::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
