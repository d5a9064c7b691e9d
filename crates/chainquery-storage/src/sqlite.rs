//! SQLite storage backend for ChainQuery.
//!
//! Persists derived entities and processor checkpoints to a single SQLite file.
//! Every [`WriteBatch`] is applied inside one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use chainquery_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./query-node.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainquery_core::checkpoint::Checkpoint;
use chainquery_core::error::IndexerError;
use chainquery_core::height::{BlockHeight, EventIndex};
use chainquery_core::store::{EntityWrite, Store, StoreConnector, WriteBatch};

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed store for entities and checkpoints.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./query-node.db"`) or a full
    /// SQLite URL (`"sqlite:./query-node.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to a single connection: every connection to `:memory:` is a
    /// separate database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    /// Create tables; optionally enable WAL mode.
    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        // Heights and indices are stored as decimal text: they may exceed i64.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                processor_id TEXT    NOT NULL PRIMARY KEY,
                block_number TEXT    NOT NULL,
                event_index  TEXT,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                kind  TEXT NOT NULL,
                id    TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of committed entities of `kind`.
    pub async fn entity_count(&self, kind: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM entities WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_checkpoint(&self, processor_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT processor_id, block_number, event_index, updated_at
             FROM checkpoints WHERE processor_id = ?",
        )
        .bind(processor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(r) = row else {
            return Ok(None);
        };

        let block_number: BlockHeight = r
            .get::<String, _>("block_number")
            .parse()
            .map_err(storage_err)?;
        let event_index = match r.get::<Option<String>, _>("event_index") {
            Some(s) => Some(s.parse::<EventIndex>().map_err(storage_err)?),
            None => None,
        };

        Ok(Some(Checkpoint {
            processor_id: r.get("processor_id"),
            block_number,
            event_index,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn delete_checkpoint(&self, processor_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE processor_id = ?")
            .bind(processor_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    async fn get_entity(&self, kind: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        let row = sqlx::query("SELECT value FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(r) => {
                let raw: String = r.get("value");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let writes = batch.writes.len();

        for write in batch.writes {
            match write {
                EntityWrite::Put { kind, id, value } => {
                    sqlx::query("INSERT OR REPLACE INTO entities (kind, id, value) VALUES (?, ?, ?)")
                        .bind(kind)
                        .bind(id)
                        .bind(serde_json::to_string(&value)?)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
                EntityWrite::Remove { kind, id } => {
                    sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
                        .bind(kind)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
            }
        }

        if let Some(cp) = &batch.checkpoint {
            sqlx::query(
                "INSERT OR REPLACE INTO checkpoints
                 (processor_id, block_number, event_index, updated_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&cp.processor_id)
            .bind(cp.block_number.to_string())
            .bind(cp.event_index.as_ref().map(|i| i.to_string()))
            .bind(cp.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;

        debug!(
            writes,
            checkpoint = ?batch.checkpoint.as_ref().map(|c| c.block_number.to_string()),
            "batch committed"
        );
        Ok(())
    }
}

/// Connector that opens a [`SqliteStore`] at a path or URL.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
}

impl SqliteConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn connect(&self) -> Result<Arc<dyn Store>, IndexerError> {
        let store = if self.path == ":memory:" {
            SqliteStore::in_memory().await?
        } else {
            SqliteStore::open(&self.path).await?
        };
        Ok(Arc::new(store))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
