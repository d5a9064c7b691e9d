//! Durable store abstraction.
//!
//! The pipeline persists two things: derived entities written by handlers and
//! the processor checkpoint. Both go through [`Store::commit`] in one
//! [`WriteBatch`] so a block's effects and the checkpoint that covers them
//! land together or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;

/// A single entity mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityWrite {
    /// Insert or replace entity `kind/id`.
    Put { kind: String, id: String, value: Value },
    /// Delete entity `kind/id` (no-op if absent).
    Remove { kind: String, id: String },
}

/// Mutations to apply atomically, optionally with a new checkpoint.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Applied in order.
    pub writes: Vec<EntityWrite>,
    pub checkpoint: Option<Checkpoint>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.checkpoint.is_none()
    }
}

/// An open connection to the durable store.
///
/// Implementations include `MemoryStore` and `SqliteStore`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the checkpoint of the given processor.
    async fn load_checkpoint(&self, processor_id: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Delete a checkpoint (e.g. when resetting a processor).
    async fn delete_checkpoint(&self, processor_id: &str) -> Result<(), IndexerError>;

    /// Read the committed value of entity `kind/id`.
    async fn get_entity(&self, kind: &str, id: &str) -> Result<Option<Value>, IndexerError>;

    /// Apply every write and the checkpoint in a single transaction.
    async fn commit(&self, batch: WriteBatch) -> Result<(), IndexerError>;
}

/// Opens the shared store connection before the pipeline starts.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Store>, IndexerError>;
}
