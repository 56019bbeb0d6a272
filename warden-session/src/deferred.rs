//! Deferred durable writes.
//!
//! Durable-store changes made while handling a request are queued as typed
//! commands and applied after the response has gone out. A single worker
//! applies batches in submission order, so writes for one session id are
//! never reordered.

use crate::error::SessionResult;
use crate::identity::{IdentityStore, SessionRecord};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use warden_log::{critical, debug, info};

const TARGET: &str = "warden::session::deferred";

/// One durable-store change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredWrite {
    /// Insert the row of a freshly authenticated session.
    InsertSession(SessionRecord),
    /// Move a row to the rotated id.
    RenameSession { old: String, new: String },
    /// Delete one row.
    DeleteSession(String),
    /// Delete every row of a user.
    DeleteAllForUser(i64),
    /// Record activity on a row.
    TouchAccess { id: String, at: DateTime<Utc> },
}

impl DeferredWrite {
    /// Command name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            DeferredWrite::InsertSession(_) => "insert_session",
            DeferredWrite::RenameSession { .. } => "rename_session",
            DeferredWrite::DeleteSession(_) => "delete_session",
            DeferredWrite::DeleteAllForUser(_) => "delete_all_for_user",
            DeferredWrite::TouchAccess { .. } => "touch_access",
        }
    }

    async fn execute(&self, store: &dyn IdentityStore) -> SessionResult<()> {
        match self {
            DeferredWrite::InsertSession(record) => store.insert(record).await,
            DeferredWrite::RenameSession { old, new } => {
                if !store.rename(old, new).await? {
                    debug!(target: TARGET, "Rename skipped, row already gone");
                }
                Ok(())
            }
            DeferredWrite::DeleteSession(id) => store.remove(id).await.map(|_| ()),
            DeferredWrite::DeleteAllForUser(user_id) => {
                let removed = store.remove_all_for_user(*user_id).await?;
                info!(target: TARGET, "Removed {} session rows for user {}", removed, user_id);
                Ok(())
            }
            DeferredWrite::TouchAccess { id, at } => store.touch(id, *at).await,
        }
    }
}

/// Ordered durable writes collected during one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredQueue {
    writes: Vec<DeferredWrite>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: DeferredWrite) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredWrite> {
        self.writes.iter()
    }

    /// Move the queued writes out, leaving this queue empty.
    pub fn take(&mut self) -> DeferredQueue {
        std::mem::take(self)
    }

    /// Apply every write in order.
    ///
    /// A failed write is logged at critical severity and the rest of the
    /// batch still runs. Returns the number of writes that failed.
    pub async fn apply(self, store: &dyn IdentityStore) -> usize {
        let mut failed = 0;
        for write in &self.writes {
            if let Err(e) = write.execute(store).await {
                failed += 1;
                critical!(
                    target: TARGET,
                    "Deferred {} failed: {}",
                    write.kind(),
                    e
                );
            }
        }
        failed
    }
}

enum Command {
    Batch(DeferredQueue),
    Flush(oneshot::Sender<()>),
    Close,
}

/// Background worker applying deferred batches in submission order.
///
/// Clones feed the same worker.
#[derive(Clone)]
pub struct WriteBehind {
    tx: mpsc::UnboundedSender<Command>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WriteBehind {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn IdentityStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Batch(batch) => {
                        let size = batch.len();
                        let failed = batch.apply(store.as_ref()).await;
                        debug!(
                            target: TARGET,
                            "Applied deferred batch ({} writes, {} failed)",
                            size,
                            failed
                        );
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                    Command::Close => break,
                }
            }
            debug!(target: TARGET, "Write-behind worker stopped");
        });

        Self {
            tx,
            handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue a batch. Empty batches are dropped.
    pub fn submit(&self, batch: DeferredQueue) {
        if batch.is_empty() {
            return;
        }

        let size = batch.len();
        if self.tx.send(Command::Batch(batch)).is_err() {
            critical!(
                target: TARGET,
                "Write-behind worker is closed, dropping {} deferred writes",
                size
            );
        }
    }

    /// Wait until every batch submitted so far has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Apply everything already submitted, then stop the worker.
    pub async fn close(&self) {
        let _ = self.tx.send(Command::Close);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityStore;
    use warden_log::{Level, capture};

    fn record(id: &str, user_id: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: id.to_string(),
            user_id,
            created_at: now,
            remote_address: "192.0.2.1".parse().unwrap(),
            user_agent: String::new(),
            last_seen_at: now,
        }
    }

    #[tokio::test]
    async fn test_queue_applies_in_order() {
        let store = MemoryIdentityStore::new();
        let mut queue = DeferredQueue::new();
        queue.push(DeferredWrite::InsertSession(record("a", 1)));
        queue.push(DeferredWrite::RenameSession {
            old: "a".into(),
            new: "b".into(),
        });
        queue.push(DeferredWrite::TouchAccess {
            id: "b".into(),
            at: Utc::now(),
        });

        assert_eq!(queue.apply(&store).await, 0);
        assert!(store.find("a").await.unwrap().is_none());
        assert!(store.find("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rename_after_delete_does_not_resurrect() {
        let store = MemoryIdentityStore::new();
        let mut queue = DeferredQueue::new();
        queue.push(DeferredWrite::InsertSession(record("a", 1)));
        queue.push(DeferredWrite::DeleteSession("a".into()));
        queue.push(DeferredWrite::RenameSession {
            old: "a".into(),
            new: "b".into(),
        });

        queue.apply(&store).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failures_are_critical_and_not_fatal() {
        let store = MemoryIdentityStore::new();
        store.set_offline(true);

        let mut queue = DeferredQueue::new();
        queue.push(DeferredWrite::InsertSession(record("a", 1)));
        queue.push(DeferredWrite::DeleteAllForUser(1));

        let logs = capture();
        assert_eq!(queue.apply(&store).await, 2);
        assert!(logs.contains(Level::Critical, "Deferred insert_session failed"));
        assert!(logs.contains(Level::Critical, "Deferred delete_all_for_user failed"));
    }

    #[tokio::test]
    async fn test_write_behind_preserves_submission_order() {
        let store = MemoryIdentityStore::new();
        let worker = WriteBehind::spawn(Arc::new(store.clone()));

        let mut first = DeferredQueue::new();
        first.push(DeferredWrite::InsertSession(record("a", 1)));
        worker.submit(first);

        let mut second = DeferredQueue::new();
        second.push(DeferredWrite::RenameSession {
            old: "a".into(),
            new: "b".into(),
        });
        worker.submit(second);

        worker.flush().await;
        assert!(store.find("b").await.unwrap().is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_rejects() {
        let store = MemoryIdentityStore::new();
        let worker = WriteBehind::spawn(Arc::new(store.clone()));

        let mut batch = DeferredQueue::new();
        batch.push(DeferredWrite::InsertSession(record("a", 1)));
        worker.submit(batch);
        worker.close().await;
        assert_eq!(store.len().await, 1);

        let logs = capture();
        let mut late = DeferredQueue::new();
        late.push(DeferredWrite::DeleteSession("a".into()));
        worker.submit(late);
        assert!(logs.contains(Level::Critical, "dropping 1 deferred writes"));
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_take_empties_queue() {
        let mut queue = DeferredQueue::new();
        queue.push(DeferredWrite::DeleteSession("a".into()));
        let taken = queue.take();
        assert!(queue.is_empty());
        assert_eq!(taken.len(), 1);
    }
}
