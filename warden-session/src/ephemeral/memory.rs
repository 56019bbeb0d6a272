//! In-process ephemeral store.

use super::{EphemeralStore, LockToken};
use crate::error::{SessionError, SessionResult};
use crate::payload::EphemeralEntry;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    entries: HashMap<String, (EphemeralEntry, Instant)>,
    locks: HashMap<String, (LockToken, Instant)>,
    users: HashMap<i64, (HashSet<String>, Instant)>,
}

/// Ephemeral store kept in process memory.
///
/// Suitable for tests and single-process deployments. Clones share state.
/// The store can be switched offline to exercise failure handling.
#[derive(Clone, Default)]
pub struct MemoryEphemeralStore {
    inner: Arc<Mutex<Inner>>,
    offline: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`SessionError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `store`/`remove` calls served.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `load` calls served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Ids of all unexpired entries.
    pub async fn session_ids(&self) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|(_, (_, expires))| *expires > now)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a lock is currently held for the id.
    pub async fn is_locked(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .locks
            .get(session_id)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    /// Ids indexed for a user, without going through the store trait.
    pub async fn user_index(&self, user_id: i64) -> Vec<String> {
        let inner = self.inner.lock().await;
        match inner.users.get(&user_id) {
            Some((ids, expires)) if *expires > Instant::now() => ids.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn check_online(&self) -> SessionResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SessionError::Unavailable("ephemeral store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn load(&self, session_id: &str) -> SessionResult<Option<EphemeralEntry>> {
        self.check_online()?;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        match inner.entries.get(session_id) {
            Some((entry, expires)) if *expires > Instant::now() => Ok(Some(entry.clone())),
            Some(_) => {
                inner.entries.remove(session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        session_id: &str,
        entry: &EphemeralEntry,
        ttl: Duration,
    ) -> SessionResult<()> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        inner
            .entries
            .insert(session_id.to_string(), (entry.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> SessionResult<()> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        self.inner.lock().await.entries.remove(session_id);
        Ok(())
    }

    async fn track(&self, user_id: i64, session_id: &str, ttl: Duration) -> SessionResult<()> {
        self.check_online()?;

        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let entry = inner
            .users
            .entry(user_id)
            .or_insert_with(|| (HashSet::new(), now));
        if entry.1 <= now {
            entry.0.clear();
        }
        entry.0.insert(session_id.to_string());
        entry.1 = now + ttl;
        Ok(())
    }

    async fn untrack(&self, user_id: i64, session_id: &str) -> SessionResult<()> {
        self.check_online()?;

        let mut inner = self.inner.lock().await;
        let emptied = match inner.users.get_mut(&user_id) {
            Some((ids, _)) => {
                ids.remove(session_id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.users.remove(&user_id);
        }
        Ok(())
    }

    async fn tracked(&self, user_id: i64) -> SessionResult<Vec<String>> {
        self.check_online()?;
        Ok(self.user_index(user_id).await)
    }

    async fn forget(&self, user_id: i64) -> SessionResult<()> {
        self.check_online()?;

        self.inner.lock().await.users.remove(&user_id);
        Ok(())
    }

    async fn try_lock(&self, session_id: &str, ttl: Duration) -> SessionResult<Option<LockToken>> {
        self.check_online()?;

        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if let Some((_, expires)) = inner.locks.get(session_id)
            && *expires > now
        {
            return Ok(None);
        }

        let token = LockToken::new();
        inner
            .locks
            .insert(session_id.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn unlock(&self, session_id: &str, token: &LockToken) -> SessionResult<()> {
        self.check_online()?;

        let mut inner = self.inner.lock().await;
        if inner
            .locks
            .get(session_id)
            .is_some_and(|(held, _)| held == token)
        {
            inner.locks.remove(session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::EphemeralSession;
    use chrono::Utc;

    fn live() -> EphemeralEntry {
        EphemeralEntry::Live(EphemeralSession::anonymous(Utc::now()))
    }

    #[tokio::test]
    async fn test_store_load_remove() {
        let store = MemoryEphemeralStore::new();
        store.store("a", &live(), Duration::from_secs(60)).await.unwrap();

        assert!(matches!(
            store.load("a").await.unwrap(),
            Some(EphemeralEntry::Live(_))
        ));
        store.remove("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryEphemeralStore::new();
        store.store("a", &live(), Duration::ZERO).await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store = MemoryEphemeralStore::new();
        let ttl = Duration::from_secs(30);

        let token = store.try_lock("a", ttl).await.unwrap().unwrap();
        assert!(store.try_lock("a", ttl).await.unwrap().is_none());
        assert!(store.try_lock("b", ttl).await.unwrap().is_some());

        // A stranger's token does not release the lock.
        store.unlock("a", &LockToken::new()).await.unwrap();
        assert!(store.is_locked("a").await);

        store.unlock("a", &token).await.unwrap();
        assert!(store.try_lock("a", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken() {
        let store = MemoryEphemeralStore::new();
        store.try_lock("a", Duration::ZERO).await.unwrap().unwrap();
        assert!(store.try_lock("a", Duration::from_secs(1)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_waits_then_times_out() {
        let store = MemoryEphemeralStore::new();
        store.try_lock("a", Duration::from_secs(30)).await.unwrap().unwrap();

        let acquired = store
            .lock(
                "a",
                Duration::from_secs(30),
                Duration::from_millis(200),
                Duration::from_millis(25),
            )
            .await
            .unwrap();
        assert!(acquired.is_none());
    }

    #[tokio::test]
    async fn test_user_index_tracks_live_ids() {
        let store = MemoryEphemeralStore::new();
        let ttl = Duration::from_secs(60);

        store.track(7, "a", ttl).await.unwrap();
        store.track(7, "b", ttl).await.unwrap();
        store.track(8, "c", ttl).await.unwrap();

        let mut ids = store.tracked(7).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        store.untrack(7, "a").await.unwrap();
        assert_eq!(store.tracked(7).await.unwrap(), vec!["b"]);

        store.forget(7).await.unwrap();
        assert!(store.tracked(7).await.unwrap().is_empty());
        assert_eq!(store.tracked(8).await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_user_index_expires() {
        let store = MemoryEphemeralStore::new();
        store.track(7, "a", Duration::ZERO).await.unwrap();
        assert!(store.tracked(7).await.unwrap().is_empty());

        store.track(7, "b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.tracked(7).await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryEphemeralStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.load("a").await,
            Err(SessionError::Unavailable(_))
        ));
        assert!(store.try_lock("a", Duration::from_secs(1)).await.is_err());
    }
}
