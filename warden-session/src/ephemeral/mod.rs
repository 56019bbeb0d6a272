//! Ephemeral session tier.
//!
//! A low-latency shared key-value store holding the live payload under the
//! session id with a TTL. It is the source of truth for whether a session is
//! active, and it provides the per-session lock that serializes concurrent
//! requests carrying the same id.
//!
//! Each store also keeps a per-user index of live authenticated ids, so that
//! ending every session of a user does not depend on durable rows whose
//! inserts may still be queued.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryEphemeralStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisEphemeralStore;

use crate::error::SessionResult;
use crate::payload::EphemeralEntry;
use async_trait::async_trait;
use std::time::Duration;

/// Proof of holding a session lock. Only the holder can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Ephemeral store backend.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Load the entry for a session id.
    ///
    /// Returns `Ok(None)` if not found or expired.
    async fn load(&self, session_id: &str) -> SessionResult<Option<EphemeralEntry>>;

    /// Write the entry, replacing any previous one, expiring after `ttl`.
    async fn store(
        &self,
        session_id: &str,
        entry: &EphemeralEntry,
        ttl: Duration,
    ) -> SessionResult<()>;

    /// Delete the entry.
    async fn remove(&self, session_id: &str) -> SessionResult<()>;

    /// Try to take the lock for a session id without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it. The lock expires by
    /// itself after `ttl` so a crashed holder cannot wedge the session.
    async fn try_lock(&self, session_id: &str, ttl: Duration) -> SessionResult<Option<LockToken>>;

    /// Release a lock taken with [`EphemeralStore::try_lock`].
    ///
    /// Releasing a lock that expired and was taken by someone else is a
    /// no-op.
    async fn unlock(&self, session_id: &str, token: &LockToken) -> SessionResult<()>;

    /// Record `session_id` as a live session of `user_id`.
    ///
    /// The index expires `ttl` after its latest addition.
    async fn track(&self, user_id: i64, session_id: &str, ttl: Duration) -> SessionResult<()>;

    /// Drop `session_id` from the index of `user_id`.
    async fn untrack(&self, user_id: i64, session_id: &str) -> SessionResult<()>;

    /// Ids indexed for `user_id`. May include ids that have since expired.
    async fn tracked(&self, user_id: i64) -> SessionResult<Vec<String>>;

    /// Drop the whole index of `user_id`.
    async fn forget(&self, user_id: i64) -> SessionResult<()>;

    /// Take the lock, retrying every `retry` until `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout.
    async fn lock(
        &self,
        session_id: &str,
        ttl: Duration,
        timeout: Duration,
        retry: Duration,
    ) -> SessionResult<Option<LockToken>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(token) = self.try_lock(session_id, ttl).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() + retry > deadline {
                return Ok(None);
            }
            tokio::time::sleep(retry).await;
        }
    }
}
