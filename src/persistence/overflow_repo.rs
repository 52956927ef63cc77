//! Durable FIFO of sync payloads that did not fit in memory.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::models::payload::SyncPayload;
use crate::{AppError, Result};

use super::db::Database;

/// One durable entry; `id` increases monotonically with insertion order.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OverflowEntry {
    /// Row identifier.
    pub id: i64,
    /// JSON-serialized [`SyncPayload`].
    pub payload: String,
}

impl OverflowEntry {
    /// Decode the stored payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the stored JSON is not a valid payload.
    pub fn decode(&self) -> Result<SyncPayload> {
        serde_json::from_str(&self.payload)
            .map_err(|err| AppError::Db(format!("corrupt overflow entry {}: {err}", self.id)))
    }
}

/// Repository over the `sync_overflow` table.
pub struct OverflowStore {
    db: Arc<Database>,
    write_lock: Mutex<()>,
}

impl OverflowStore {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    /// Append a payload, returning its entry id once committed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the insert fails.
    pub async fn append(&self, payload: &SyncPayload) -> Result<i64> {
        let encoded = serde_json::to_string(payload)
            .map_err(|err| AppError::Db(format!("failed to encode payload: {err}")))?;
        self.insert_raw(&encoded).await
    }

    /// Read up to `limit` entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn read_oldest(&self, limit: u32) -> Result<Vec<OverflowEntry>> {
        let rows: Vec<OverflowEntry> = sqlx::query_as(
            "SELECT id, payload FROM sync_overflow ORDER BY id ASC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows)
    }

    /// Delete an entry by id. Deleting a missing id is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM sync_overflow WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Number of entries currently stored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_overflow")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Import legacy one-file-per-payload `*.json` files from `dir`.
    ///
    /// Files are imported in name order and removed once inserted;
    /// unreadable files are left in place. Returns the number imported.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the glob pattern is invalid.
    pub async fn migrate_legacy_files(&self, dir: &Path) -> Result<usize> {
        let pattern = dir.join("*.json");
        let pattern = pattern.to_string_lossy();
        let mut files: Vec<_> = glob::glob(&pattern)
            .map_err(|err| AppError::Db(format!("invalid legacy pattern: {err}")))?
            .filter_map(std::result::Result::ok)
            .collect();
        files.sort();

        let mut imported = 0;
        for path in files {
            let value = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => serde_json::from_str::<serde_json::Value>(&raw),
                Err(err) => {
                    warn!(path = %path.display(), %err, "cannot read legacy overflow file");
                    continue;
                }
            };
            let Ok(value) = value else {
                warn!(path = %path.display(), "skipping malformed legacy overflow file");
                continue;
            };
            if let Err(err) = self.insert_raw(&value.to_string()).await {
                warn!(path = %path.display(), %err, "failed to import legacy overflow file");
                continue;
            }
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), %err, "imported legacy file could not be removed");
            }
            imported += 1;
        }

        if imported > 0 {
            info!(imported, "migrated legacy overflow files");
        }
        Ok(imported)
    }

    async fn insert_raw(&self, encoded: &str) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("INSERT INTO sync_overflow (payload) VALUES (?1)")
            .bind(encoded)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Close the underlying pool, checkpointing the write-ahead log.
    pub async fn close(&self) {
        self.db.close().await;
    }
}
