//! Redis ephemeral store.

use super::{EphemeralStore, LockToken};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::payload::EphemeralEntry;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use warden_log::{debug, info};

/// Deletes the lock key only if it still holds the caller's token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed ephemeral store.
///
/// Payloads are JSON strings under `{namespace}:{id}` written with
/// millisecond expiry (`PSETEX`). Locks are
/// `SET {namespace}:lock:{id} <token> NX PX <ttl>` and released by a
/// compare-and-delete script. The ids of a user's authenticated sessions
/// are a set under `{namespace}:user:{user_id}`.
///
/// # Examples
///
/// ```no_run
/// use warden_session::{RedisEphemeralStore, SessionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::redis("redis://localhost:6379")?;
/// let store = RedisEphemeralStore::new(config).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisEphemeralStore {
    conn: ConnectionManager,
    config: SessionConfig,
}

impl RedisEphemeralStore {
    /// Connect to the Redis instance named by `config.redis_url`.
    pub async fn new(config: SessionConfig) -> SessionResult<Self> {
        info!(target: "warden::session", "Connecting ephemeral session store");

        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        debug!(target: "warden::session", "Ephemeral store namespace: {}", config.namespace);
        Ok(Self { conn, config })
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeralStore {
    async fn load(&self, session_id: &str) -> SessionResult<Option<EphemeralEntry>> {
        let key = self.config.session_key(session_id);
        let mut conn = self.conn.clone();

        let data: Option<String> = conn.get(&key).await?;

        data.map(|json| EphemeralEntry::from_json(&json)).transpose()
    }

    async fn store(
        &self,
        session_id: &str,
        entry: &EphemeralEntry,
        ttl: Duration,
    ) -> SessionResult<()> {
        let key = self.config.session_key(session_id);
        let mut conn = self.conn.clone();

        let json = entry.to_json()?;
        let _: () = conn.pset_ex(&key, json, ttl_millis(ttl)).await?;

        Ok(())
    }

    async fn remove(&self, session_id: &str) -> SessionResult<()> {
        let key = self.config.session_key(session_id);
        let mut conn = self.conn.clone();

        let _: () = conn.del(&key).await?;

        Ok(())
    }

    async fn track(&self, user_id: i64, session_id: &str, ttl: Duration) -> SessionResult<()> {
        let key = self.config.user_key(user_id);
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .sadd(&key, session_id)
            .ignore()
            .pexpire(&key, ttl_millis(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn untrack(&self, user_id: i64, session_id: &str) -> SessionResult<()> {
        let key = self.config.user_key(user_id);
        let mut conn = self.conn.clone();

        let _: () = conn.srem(&key, session_id).await?;

        Ok(())
    }

    async fn tracked(&self, user_id: i64) -> SessionResult<Vec<String>> {
        let key = self.config.user_key(user_id);
        let mut conn = self.conn.clone();

        let ids: Vec<String> = conn.smembers(&key).await?;

        Ok(ids)
    }

    async fn forget(&self, user_id: i64) -> SessionResult<()> {
        let key = self.config.user_key(user_id);
        let mut conn = self.conn.clone();

        let _: () = conn.del(&key).await?;

        Ok(())
    }

    async fn try_lock(&self, session_id: &str, ttl: Duration) -> SessionResult<Option<LockToken>> {
        let key = self.config.lock_key(session_id);
        let mut conn = self.conn.clone();
        let token = LockToken::new();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn unlock(&self, session_id: &str, token: &LockToken) -> SessionResult<()> {
        let key = self.config.lock_key(session_id);
        let mut conn = self.conn.clone();

        let _: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(&key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }
}

/// Expiry in whole milliseconds; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
