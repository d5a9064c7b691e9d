//! Checkpoint manager: tracks the processor's durable position for crash recovery.
//!
//! A checkpoint stores the last fully processed block height and the index of
//! the last event applied in it. On restart, the pipeline resumes from the
//! checkpoint rather than from in-memory state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::height::{BlockHeight, EventIndex};
use crate::store::Store;
use crate::types::QueryEventBlock;

/// A persisted checkpoint for a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique processor identifier.
    pub processor_id: String,
    /// Last fully processed block.
    pub block_number: BlockHeight,
    /// Index of the last event applied at `block_number`; `None` if that
    /// block carried no events.
    pub event_index: Option<EventIndex>,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    /// Returns `true` if the event at (`height`, `index`) was already applied.
    pub fn covers(&self, height: &BlockHeight, index: &EventIndex) -> bool {
        match height.cmp(&self.block_number) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.event_index.as_ref().is_some_and(|e| index <= e),
            std::cmp::Ordering::Greater => false,
        }
    }
}

/// Manages checkpoint reads and builds the next checkpoint for a processor.
pub struct CheckpointManager {
    store: Arc<dyn Store>,
    processor_id: String,
    last: Option<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn Store>, processor_id: impl Into<String>) -> Self {
        Self {
            store,
            processor_id: processor_id.into(),
            last: None,
        }
    }

    pub fn processor_id(&self) -> &str {
        &self.processor_id
    }

    /// Load the saved checkpoint (returns `None` if none exists) and remember it.
    pub async fn load(&mut self) -> Result<Option<Checkpoint>, IndexerError> {
        self.last = self.store.load_checkpoint(&self.processor_id).await?;
        Ok(self.last.clone())
    }

    /// The last checkpoint loaded or recorded.
    pub fn last(&self) -> Option<&Checkpoint> {
        self.last.as_ref()
    }

    /// Build the checkpoint that covers `block` once all its events are applied.
    ///
    /// A resume-filtered block records the index it resumed after even when
    /// nothing is left in the batch, and an empty batch for the height of the
    /// current checkpoint keeps the recorded index. Either way a restart never
    /// reopens events that were already handled.
    pub fn next_for(&self, block: &QueryEventBlock) -> Checkpoint {
        let event_index = block.handled_through().cloned().or_else(|| {
            self.last
                .as_ref()
                .filter(|cp| cp.block_number == block.block_number)
                .and_then(|cp| cp.event_index.clone())
        });
        Checkpoint {
            processor_id: self.processor_id.clone(),
            block_number: block.block_number.clone(),
            event_index,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Remember a checkpoint after it has been committed.
    pub fn record(&mut self, checkpoint: Checkpoint) {
        self.last = Some(checkpoint);
    }
}
