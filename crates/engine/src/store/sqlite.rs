//! SQLite-backed snapshot store.

use std::str::FromStr;

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use async_trait::async_trait;

use super::{QUEUE_KEY, QueueSnapshot, SnapshotStore, StoreError};

/// Snapshot store backed by a single-row keyed upsert in SQLite.
///
/// SQLite's transactional write provides the old-or-new-never-torn
/// guarantee the store contract requires. A single connection is enough:
/// the engine serializes every mutation behind its own queue lock.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    key: String,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the
    /// snapshot table exists.
    ///
    /// `url` is a SQLite connection string, e.g. `sqlite://claws.db` or
    /// `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            key: QUEUE_KEY.to_string(),
        })
    }

    /// Use a non-default snapshot key (layout migration by key rotation).
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn load(&self) -> Result<Option<QueueSnapshot>, StoreError> {
        let row = sqlx::query("SELECT value FROM snapshot WHERE key = ?1")
            .bind(&self.key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: String = row
            .try_get("value")
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        serde_json::from_str(&value)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StoreError> {
        let value =
            serde_json::to_string(snapshot).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO snapshot (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.key)
        .bind(&value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}
