//! PostgreSQL durable store (diesel-async over a deadpool pool).

use super::{IdentityStore, SessionRecord, ip_from_bytes, ip_to_bytes};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::net::{IpAddr, Ipv4Addr};
use warden_log::{debug, info, warn};

diesel::table! {
    sessions (id) {
        id -> Text,
        user_id -> Int8,
        user_agent -> Text,
        remote_address -> Bytea,
        authenticated_at -> Timestamptz,
        last_seen_at -> Timestamptz,
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SessionRow {
    id: String,
    user_id: i64,
    user_agent: String,
    remote_address: Vec<u8>,
    authenticated_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl From<&SessionRecord> for SessionRow {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id,
            user_agent: record.user_agent.clone(),
            remote_address: ip_to_bytes(&record.remote_address),
            authenticated_at: record.created_at,
            last_seen_at: record.last_seen_at,
        }
    }
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        let remote_address = ip_from_bytes(&row.remote_address).unwrap_or_else(|| {
            warn!(
                target: "warden::session",
                "Session row has a malformed remote address ({} bytes)",
                row.remote_address.len()
            );
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });

        Self {
            id: row.id,
            user_id: row.user_id,
            created_at: row.authenticated_at,
            remote_address,
            user_agent: row.user_agent,
            last_seen_at: row.last_seen_at,
        }
    }
}

/// PostgreSQL-backed durable store.
///
/// Expects the `sessions` table from [`super::MIGRATION_SQL`].
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: Pool<AsyncPgConnection>,
}

impl PgIdentityStore {
    /// Create a pool of `pool_size` connections to `database_url`.
    pub fn new(database_url: &str, pool_size: usize) -> SessionResult<Self> {
        info!(target: "warden::session", "Creating durable session store pool");
        debug!(target: "warden::session", "Pool size: {}", pool_size);

        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| SessionError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> SessionResult<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| SessionError::Pool(e.to_string()))
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn insert(&self, record: &SessionRecord) -> SessionResult<()> {
        let mut conn = self.conn().await?;
        let row = SessionRow::from(record);

        diesel::insert_into(sessions::table)
            .values(&row)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn find(&self, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        let mut conn = self.conn().await?;

        let row = sessions::table
            .find(session_id)
            .select(SessionRow::as_select())
            .first(&mut *conn)
            .await
            .optional()?;

        Ok(row.map(SessionRecord::from))
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        let old_id = old_id.to_string();
        let new_id = new_id.to_string();

        let renamed = (&mut *conn)
            .transaction::<bool, diesel::result::Error, _>(|conn| {
                async move {
                    let old_row: Option<SessionRow> = diesel::delete(sessions::table.find(&old_id))
                        .returning(SessionRow::as_returning())
                        .get_result(conn)
                        .await
                        .optional()?;

                    match old_row {
                        Some(mut row) => {
                            row.id = new_id;
                            diesel::insert_into(sessions::table)
                                .values(&row)
                                .execute(conn)
                                .await?;
                            Ok(true)
                        }
                        None => Ok(false),
                    }
                }
                .scope_boxed()
            })
            .await?;

        Ok(renamed)
    }

    async fn remove(&self, session_id: &str) -> SessionResult<bool> {
        let mut conn = self.conn().await?;

        let deleted = diesel::delete(sessions::table.find(session_id))
            .execute(&mut *conn)
            .await?;

        Ok(deleted > 0)
    }

    async fn remove_all_for_user(&self, user_id: i64) -> SessionResult<usize> {
        let mut conn = self.conn().await?;

        let deleted = diesel::delete(sessions::table.filter(sessions::user_id.eq(user_id)))
            .execute(&mut *conn)
            .await?;

        Ok(deleted)
    }

    async fn list_for_user(&self, user_id: i64) -> SessionResult<Vec<SessionRecord>> {
        let mut conn = self.conn().await?;

        let rows = sessions::table
            .filter(sessions::user_id.eq(user_id))
            .order(sessions::last_seen_at.desc())
            .select(SessionRow::as_select())
            .load(&mut *conn)
            .await?;

        Ok(rows.into_iter().map(SessionRecord::from).collect())
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> SessionResult<()> {
        let mut conn = self.conn().await?;

        diesel::update(sessions::table.find(session_id))
            .set(sessions::last_seen_at.eq(at))
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_keeps_fields() {
        let now = Utc::now();
        let record = SessionRecord {
            id: "abc".to_string(),
            user_id: 9,
            created_at: now,
            remote_address: "2001:db8::2".parse().unwrap(),
            user_agent: "agent".to_string(),
            last_seen_at: now,
        };

        let row = SessionRow::from(&record);
        assert_eq!(row.remote_address.len(), 16);
        assert_eq!(SessionRecord::from(row), record);
    }

    #[test]
    fn test_malformed_address_degrades_to_unspecified() {
        let now = Utc::now();
        let row = SessionRow {
            id: "abc".to_string(),
            user_id: 9,
            user_agent: String::new(),
            remote_address: vec![1, 2, 3],
            authenticated_at: now,
            last_seen_at: now,
        };
        assert_eq!(
            SessionRecord::from(row).remote_address,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }
}
