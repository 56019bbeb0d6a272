//! Durable session tier.
//!
//! One row per authenticated session, surviving process and cache restarts.
//! Rows are never mutated in place on rotation: the old row is deleted and a
//! new one inserted for the same user.

mod memory;
#[cfg(feature = "postgres")]
mod pg_store;

pub use memory::MemoryIdentityStore;
#[cfg(feature = "postgres")]
pub use pg_store::PgIdentityStore;

use crate::error::SessionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// DDL for the durable store.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id               TEXT PRIMARY KEY,
    user_id          BIGINT NOT NULL,
    user_agent       TEXT NOT NULL DEFAULT '',
    remote_address   BYTEA NOT NULL,
    authenticated_at TIMESTAMPTZ NOT NULL,
    last_seen_at     TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS sessions_user_id_idx ON sessions (user_id);
"#;

/// A durable session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: i64,
    /// When the identity authenticated
    pub created_at: DateTime<Utc>,
    pub remote_address: IpAddr,
    pub user_agent: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Durable store backend.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a row.
    async fn insert(&self, record: &SessionRecord) -> SessionResult<()>;

    /// Find a row by session id.
    async fn find(&self, session_id: &str) -> SessionResult<Option<SessionRecord>>;

    /// Move a row to a new id (delete then insert, in one transaction).
    ///
    /// Returns `false` without inserting when the old row is already gone,
    /// so a rename racing a destroy cannot resurrect the session.
    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<bool>;

    /// Delete a row. Returns whether it existed.
    async fn remove(&self, session_id: &str) -> SessionResult<bool>;

    /// Delete every row of a user. Returns the number deleted.
    async fn remove_all_for_user(&self, user_id: i64) -> SessionResult<usize>;

    /// Rows of a user, most recently seen first.
    async fn list_for_user(&self, user_id: i64) -> SessionResult<Vec<SessionRecord>>;

    /// Record activity on a row.
    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> SessionResult<()>;
}

/// Binary form of an address: 4 bytes for IPv4, 16 for IPv6.
pub fn ip_to_bytes(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Parse the binary form produced by [`ip_to_bytes`].
pub fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
