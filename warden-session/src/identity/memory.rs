//! In-process durable store.

use super::{IdentityStore, SessionRecord};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Durable store kept in process memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    rows: Arc<Mutex<HashMap<String, SessionRecord>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`SessionError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of rows.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    fn check_online(&self) -> SessionResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SessionError::Unavailable("identity store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn insert(&self, record: &SessionRecord) -> SessionResult<()> {
        self.check_online()?;
        self.rows
            .lock()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        self.check_online()?;
        Ok(self.rows.lock().await.get(session_id).cloned())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> SessionResult<bool> {
        self.check_online()?;
        let mut rows = self.rows.lock().await;
        match rows.remove(old_id) {
            Some(mut record) => {
                record.id = new_id.to_string();
                rows.insert(new_id.to_string(), record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, session_id: &str) -> SessionResult<bool> {
        self.check_online()?;
        Ok(self.rows.lock().await.remove(session_id).is_some())
    }

    async fn remove_all_for_user(&self, user_id: i64) -> SessionResult<usize> {
        self.check_online()?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, record| record.user_id != user_id);
        Ok(before - rows.len())
    }

    async fn list_for_user(&self, user_id: i64) -> SessionResult<Vec<SessionRecord>> {
        self.check_online()?;
        let mut records: Vec<SessionRecord> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(records)
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> SessionResult<()> {
        self.check_online()?;
        if let Some(record) = self.rows.lock().await.get_mut(session_id) {
            record.last_seen_at = at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, user_id: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: id.to_string(),
            user_id,
            created_at: now,
            remote_address: "198.51.100.7".parse().unwrap(),
            user_agent: "test-agent".to_string(),
            last_seen_at: now,
        }
    }

    #[tokio::test]
    async fn test_rename_moves_row() {
        let store = MemoryIdentityStore::new();
        store.insert(&record("old", 1)).await.unwrap();

        assert!(store.rename("old", "new").await.unwrap());
        assert!(store.find("old").await.unwrap().is_none());
        let moved = store.find("new").await.unwrap().unwrap();
        assert_eq!(moved.user_id, 1);
        assert_eq!(moved.id, "new");
    }

    #[tokio::test]
    async fn test_rename_of_missing_row_inserts_nothing() {
        let store = MemoryIdentityStore::new();
        assert!(!store.rename("gone", "new").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_all_for_user() {
        let store = MemoryIdentityStore::new();
        store.insert(&record("a", 1)).await.unwrap();
        store.insert(&record("b", 1)).await.unwrap();
        store.insert(&record("c", 2)).await.unwrap();

        assert_eq!(store.remove_all_for_user(1).await.unwrap(), 2);
        assert!(store.list_for_user(1).await.unwrap().is_empty());
        assert_eq!(store.list_for_user(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_last_seen() {
        let store = MemoryIdentityStore::new();
        store.insert(&record("a", 1)).await.unwrap();
        store.insert(&record("b", 1)).await.unwrap();
        store
            .touch("a", Utc::now() + Duration::seconds(60))
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_for_user(1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
