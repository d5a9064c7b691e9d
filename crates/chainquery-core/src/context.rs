//! Persistence context handed to event handlers.
//!
//! Handlers never write to the store directly. Their writes are buffered here
//! and committed together with the block checkpoint, so a failing handler
//! leaves no partial state behind.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;
use crate::height::BlockHeight;
use crate::store::{EntityWrite, Store, WriteBatch};

/// Buffered read-your-writes view over the store for one unit of work.
pub struct PersistenceContext {
    store: Arc<dyn Store>,
    block_number: Option<BlockHeight>,
    writes: Vec<EntityWrite>,
    overlay: HashMap<(String, String), Option<Value>>,
}

impl PersistenceContext {
    pub fn new(store: Arc<dyn Store>, block_number: Option<BlockHeight>) -> Self {
        Self {
            store,
            block_number,
            writes: Vec::new(),
            overlay: HashMap::new(),
        }
    }

    /// The block being processed; `None` outside block processing (bootstrap).
    pub fn block_number(&self) -> Option<&BlockHeight> {
        self.block_number.as_ref()
    }

    /// Read entity `kind/id`, seeing writes buffered in this context first.
    pub async fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        if let Some(buffered) = self.overlay.get(&(kind.to_string(), id.to_string())) {
            return Ok(buffered.clone());
        }
        self.store.get_entity(kind, id).await
    }

    /// Typed [`get`](Self::get).
    pub async fn load<T: DeserializeOwned>(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Option<T>, IndexerError> {
        match self.get(kind, id).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// Buffer an insert-or-replace of entity `kind/id`.
    pub fn put(&mut self, kind: impl Into<String>, id: impl Into<String>, value: Value) {
        let (kind, id) = (kind.into(), id.into());
        self.overlay
            .insert((kind.clone(), id.clone()), Some(value.clone()));
        self.writes.push(EntityWrite::Put { kind, id, value });
    }

    /// Typed [`put`](Self::put).
    pub fn save<T: Serialize>(
        &mut self,
        kind: impl Into<String>,
        id: impl Into<String>,
        entity: &T,
    ) -> Result<(), IndexerError> {
        let value = serde_json::to_value(entity)?;
        self.put(kind, id, value);
        Ok(())
    }

    /// Buffer a delete of entity `kind/id`.
    pub fn remove(&mut self, kind: impl Into<String>, id: impl Into<String>) {
        let (kind, id) = (kind.into(), id.into());
        self.overlay.insert((kind.clone(), id.clone()), None);
        self.writes.push(EntityWrite::Remove { kind, id });
    }

    /// Number of buffered writes.
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Turn the buffered writes into a batch, optionally sealed with a checkpoint.
    pub fn into_batch(self, checkpoint: Option<Checkpoint>) -> WriteBatch {
        WriteBatch {
            writes: self.writes,
            checkpoint,
        }
    }
}
