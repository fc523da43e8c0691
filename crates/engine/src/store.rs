//! Durable, restart-safe persistence of the queue.
//!
//! The whole queue is persisted as a single serialized snapshot, versioned
//! implicitly by key name: an incompatible future layout migrates by key
//! rotation rather than in-place mutation. Implementations must be atomic
//! enough that a crash leaves either the old or the new snapshot, never a
//! torn write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use talon_core::Transaction;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Key under which the current snapshot layout is stored.
pub const QUEUE_KEY: &str = "talon.queue.v1";

/// The persisted record: the ordered queue plus the last successful sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub transactions: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Snapshot store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Durable store contract: `load` the queue at startup, `save` it after
/// every mutation.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the current snapshot, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<QueueSnapshot>, StoreError>;

    /// Atomically replace the snapshot.
    async fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StoreError>;
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<Option<QueueSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<QueueSnapshot>, StoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("snapshot lock poisoned".into()))?;
        Ok(guard.clone())
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("snapshot lock poisoned".into()))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_core::TxnKind;

    #[tokio::test]
    async fn load_before_any_save_is_none() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryStore::new();
        let snapshot = QueueSnapshot {
            transactions: vec![Transaction::new(TxnKind::capture("milk"))],
            last_sync_at: Some(Utc::now()),
        };
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let store = MemoryStore::new();
        store.save(&QueueSnapshot::default()).await.unwrap();

        let later = QueueSnapshot {
            transactions: vec![Transaction::new(TxnKind::strike("c1"))],
            last_sync_at: None,
        };
        store.save(&later).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), later);
    }
}
