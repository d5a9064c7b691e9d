//! The mappings processor: applies a processing pack to ordered event batches.
//!
//! For each batch, in order:
//!   - skip what a previous run already committed (checkpoint) or what lies
//!     before an explicit resume height
//!   - dispatch every event to the handler registered for its type
//!   - commit the buffered entity writes and the new checkpoint in one batch
//!
//! A handler failure aborts the block before anything is committed, so the
//! block is replayed in full on the next run.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use chainquery_core::checkpoint::{Checkpoint, CheckpointManager};
use chainquery_core::context::PersistenceContext;
use chainquery_core::error::IndexerError;
use chainquery_core::handler::{HandlerRegistry, ProcessingPack};
use chainquery_core::height::BlockHeight;
use chainquery_core::store::Store;
use chainquery_core::types::QueryEventBlock;

/// Counters for one [`MappingsProcessor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    /// Blocks committed.
    pub blocks: u64,
    /// Events dispatched to a handler.
    pub handled_events: u64,
    /// Blocks dropped because they were already processed.
    pub skipped_blocks: u64,
    /// Last committed block.
    pub last_block: Option<BlockHeight>,
}

/// Consumes [`QueryEventBlock`]s and persists what the pack derives from them.
pub struct MappingsProcessor {
    registry: HandlerRegistry,
    store: Arc<dyn Store>,
    checkpoints: CheckpointManager,
    pack_name: String,
}

impl MappingsProcessor {
    /// Validate `pack` and build the dispatch map.
    pub fn create(
        processor_id: impl Into<String>,
        pack: &ProcessingPack,
        store: Arc<dyn Store>,
    ) -> Result<Self, IndexerError> {
        let registry = HandlerRegistry::from_pack(pack)?;
        let checkpoints = CheckpointManager::new(store.clone(), processor_id);
        debug!(
            processor = checkpoints.processor_id(),
            pack = %pack.name,
            handlers = registry.len(),
            "Created mappings processor"
        );
        Ok(Self {
            registry,
            store,
            checkpoints,
            pack_name: pack.name.clone(),
        })
    }

    pub fn processor_id(&self) -> &str {
        self.checkpoints.processor_id()
    }

    /// Load the durable checkpoint of this processor.
    pub async fn load_checkpoint(&mut self) -> Result<Option<Checkpoint>, IndexerError> {
        self.checkpoints.load().await
    }

    /// The last checkpoint loaded or committed.
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Process `blocks` until the stream ends or `shutdown` is set.
    ///
    /// With `resume_at_height`, blocks below it are skipped and the stored
    /// checkpoint is not consulted; otherwise everything at or before the
    /// checkpoint is skipped. Shutdown is observed between blocks.
    pub async fn run(
        &mut self,
        mut blocks: mpsc::UnboundedReceiver<QueryEventBlock>,
        resume_at_height: Option<BlockHeight>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ProcessingStats, IndexerError> {
        let checkpoint = self.checkpoints.load().await?;
        match (&resume_at_height, &checkpoint) {
            (Some(height), _) => info!(
                processor = self.processor_id(),
                resume_at = %height,
                "Processing from explicit resume height"
            ),
            (None, Some(cp)) => info!(
                processor = self.processor_id(),
                block = %cp.block_number,
                event_index = ?cp.event_index.as_ref().map(|i| i.to_string()),
                "Resuming from checkpoint"
            ),
            (None, None) => info!(processor = self.processor_id(), "No checkpoint, processing from the first block"),
        }
        let skip = if resume_at_height.is_some() { None } else { checkpoint };

        let mut stats = ProcessingStats::default();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let block = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                block = blocks.recv() => match block {
                    Some(block) => block,
                    None => break,
                },
            };

            if let Some(resume) = &resume_at_height {
                if block.block_number < *resume {
                    debug!(height = %block.block_number, "Skipping block before resume height");
                    stats.skipped_blocks += 1;
                    continue;
                }
            }

            let block = match skip.as_ref() {
                Some(cp) => match unapplied(block, cp) {
                    Some(block) => block,
                    None => {
                        stats.skipped_blocks += 1;
                        continue;
                    }
                },
                None => block,
            };

            let handled = self.process_block(&block).await.map_err(|e| {
                error!(
                    processor = self.processor_id(),
                    height = %block.block_number,
                    error = %e,
                    "Failed to process block"
                );
                e
            })?;

            stats.blocks += 1;
            stats.handled_events += handled as u64;
            stats.last_block = Some(block.block_number);
        }

        info!(
            processor = self.processor_id(),
            blocks = stats.blocks,
            events = stats.handled_events,
            "Mappings processor finished"
        );
        Ok(stats)
    }

    /// Apply one block and commit its writes together with the checkpoint.
    ///
    /// Returns the number of events that had a handler.
    pub async fn process_block(&mut self, block: &QueryEventBlock) -> Result<usize, IndexerError> {
        let mut ctx = PersistenceContext::new(self.store.clone(), Some(block.block_number.clone()));
        let mut handled = 0;

        for event in &block.query_events {
            match self.registry.dispatch(event, &mut ctx).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e @ (IndexerError::Handler { .. } | IndexerError::Storage(_))) => return Err(e),
                Err(e) => {
                    return Err(IndexerError::Handler {
                        handler: event.event_type(),
                        block_number: block.block_number.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        let checkpoint = self.checkpoints.next_for(block);
        let writes = ctx.pending();
        self.store.commit(ctx.into_batch(Some(checkpoint.clone()))).await?;
        self.checkpoints.record(checkpoint);

        debug!(
            pack = %self.pack_name,
            height = %block.block_number,
            events = block.len(),
            handled,
            writes,
            "Block committed"
        );
        Ok(handled)
    }
}

/// Drop the events of `block` covered by `checkpoint`; `None` when nothing is left to do.
fn unapplied(block: QueryEventBlock, checkpoint: &Checkpoint) -> Option<QueryEventBlock> {
    if block.block_number < checkpoint.block_number {
        return None;
    }
    if block.block_number > checkpoint.block_number {
        return Some(block);
    }

    let QueryEventBlock {
        block_number,
        block_hash,
        query_events,
        resumed_after,
    } = block;
    let remaining: Vec<_> = query_events
        .into_iter()
        .filter(|e| !checkpoint.covers(&block_number, &e.index))
        .collect();
    if remaining.is_empty() {
        return None;
    }
    let mut block = QueryEventBlock::new(block_number, block_hash, remaining);
    block.resumed_after = resumed_after;
    Some(block)
}
