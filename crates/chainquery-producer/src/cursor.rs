//! Producer cursor: tracks the next block to fetch and the chain height hint.

use chainquery_core::height::{BlockHeight, EventIndex};
use chainquery_core::types::{Hash, Header};
use serde::{Deserialize, Serialize};

/// The producer's position in the chain.
///
/// - `next_block` only moves forward, one block per emitted batch.
/// - `chain_height_hint` only moves forward; a lower head is ignored.
/// - `resume_block` / `last_processed_event_index` drop already-handled events
///   from the first block of a run that resumes mid-block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorState {
    /// Next block height to fetch.
    pub next_block: BlockHeight,
    /// Index of the last event handled at `resume_block` in a previous run.
    pub last_processed_event_index: Option<EventIndex>,
    /// Latest known chain height.
    pub chain_height_hint: BlockHeight,
    /// Height the current run resumed at.
    pub resume_block: Option<BlockHeight>,
    /// `true` until the first block of the run has been emitted.
    first_block_pending: bool,
    /// Hash of the last emitted block, for parent linkage checks.
    last_emitted: Option<(BlockHeight, Hash)>,
    /// Bumped on every start; fetches begun under an older run are stale.
    run: u64,
}

impl CursorState {
    /// Open a new run. Returns its id.
    pub fn begin_run(&mut self) -> u64 {
        self.run += 1;
        self.run
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    /// Returns `true` if a block fetched at `height` under `run` may still be
    /// emitted.
    pub fn accepts(&self, run: u64, height: &BlockHeight) -> bool {
        self.run == run && self.next_block == *height
    }

    /// Start a run at `block`, skipping events up to `event_index` in it.
    pub fn resume_at(&mut self, block: BlockHeight, event_index: Option<EventIndex>) {
        self.next_block = block.clone();
        self.resume_block = Some(block);
        self.last_processed_event_index = event_index;
        self.first_block_pending = true;
        self.last_emitted = None;
    }

    /// Returns the height to fetch next if it is at or below the chain height hint.
    pub fn pending_block(&self) -> Option<BlockHeight> {
        (self.next_block <= self.chain_height_hint).then(|| self.next_block.clone())
    }

    /// Returns `true` if there are blocks left to fetch.
    pub fn has_work(&self) -> bool {
        self.next_block <= self.chain_height_hint
    }

    /// Raise the chain height hint. Returns `false` (and leaves the hint
    /// untouched) if `height` is below the current hint.
    pub fn observe_chain_height(&mut self, height: BlockHeight) -> bool {
        if height < self.chain_height_hint {
            return false;
        }
        self.chain_height_hint = height;
        true
    }

    /// Events at `height` with an index at or below the returned value must be
    /// dropped; `None` means keep everything.
    pub fn resume_filter(&self, height: &BlockHeight) -> Option<&EventIndex> {
        if !self.first_block_pending || self.resume_block.as_ref() != Some(height) {
            return None;
        }
        self.last_processed_event_index.as_ref()
    }

    /// Returns the expected parent hash of `header` when the previous height
    /// was emitted in this run and its hash differs from `header.parent_hash`.
    pub fn parent_mismatch(&self, header: &Header) -> Option<&Hash> {
        let (height, hash) = self.last_emitted.as_ref()?;
        (height.next() == header.number && *hash != header.parent_hash).then_some(hash)
    }

    /// Record that the block at `next_block` was emitted and move on.
    pub fn advance(&mut self, hash: Hash) {
        self.last_emitted = Some((self.next_block.clone(), hash));
        self.first_block_pending = false;
        self.next_block.increment();
    }
}
