//! The block producer: follows the chain and emits one [`QueryEventBlock`] per block.
//!
//! # Production pass
//! While `next_block <= chain_height_hint` and the producer is running:
//!   - fetch hash, events and full block (each bounded by `fetch_timeout`)
//!   - reconcile events with extrinsics, drop already-processed events of the
//!     resume block
//!   - emit the batch, reset the backoff, advance
//!
//! A retryable fetch failure is logged, waited out with exponential backoff
//! and retried at the same height; a block is never skipped. Any other error
//! stops the producer and is kept for [`BlockProducer::take_failure`].
//!
//! # Triggers
//! The initial `start`, every new-head notification, and the polling fallback
//! all call `trigger`, which spawns a pass only if none is running (atomic
//! compare-and-set on the `producing` flag).
//!
//! # Runs
//! Every `start` opens a new cursor run. A fetch that completes after the run
//! it was issued for has been replaced is discarded, so a stop/start during an
//! in-flight fetch never emits a block at the wrong height.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chainquery_core::backoff::Backoff;
use chainquery_core::config::ProducerConfig;
use chainquery_core::error::IndexerError;
use chainquery_core::height::{BlockHeight, EventIndex};
use chainquery_core::service::{HeaderStream, QueryService};
use chainquery_core::types::QueryEventBlock;

use crate::cursor::CursorState;
use crate::fetcher::BlockFetcher;

/// Point-in-time view of a producer, for supervision and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub started: bool,
    pub producing: bool,
    pub next_block: BlockHeight,
    pub chain_height_hint: BlockHeight,
}

/// Produces ordered, gap-free event batches from a [`QueryService`].
///
/// Cloning yields another handle to the same producer.
#[derive(Clone)]
pub struct BlockProducer {
    inner: Arc<Inner>,
}

struct Subscription {
    id: u64,
    tx: mpsc::UnboundedSender<QueryEventBlock>,
}

/// Outcome of producing one height.
enum Produced {
    Emitted,
    /// Fetched for a run that has since been replaced.
    Stale,
    /// Nobody is listening; the cursor was left in place.
    NoConsumer,
}

struct Inner {
    fetcher: BlockFetcher,
    config: ProducerConfig,
    started: AtomicBool,
    producing: AtomicBool,
    cursor: Mutex<CursorState>,
    sender: Mutex<Option<Subscription>>,
    subscriptions: AtomicU64,
    /// Subscription to close once the running pass exits.
    close_after_pass: Mutex<Option<u64>>,
    heads_task: Mutex<Option<JoinHandle<()>>>,
    failure: Mutex<Option<IndexerError>>,
}

impl BlockProducer {
    pub fn new(query: Arc<dyn QueryService>, config: ProducerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher: BlockFetcher::new(query, config.fetch_timeout()),
                config,
                started: AtomicBool::new(false),
                producing: AtomicBool::new(false),
                cursor: Mutex::new(CursorState::default()),
                sender: Mutex::new(None),
                subscriptions: AtomicU64::new(0),
                close_after_pass: Mutex::new(None),
                heads_task: Mutex::new(None),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to emitted batches.
    ///
    /// There is a single consumer: a new subscription replaces the previous
    /// one, whose stream then ends. Subscribe before [`start`](Self::start);
    /// a block produced with no live subscriber stops the producer without
    /// advancing past it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<QueryEventBlock> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.subscriptions.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.sender.lock().unwrap() = Some(Subscription { id, tx });
        rx
    }

    /// Start producing from `resume_height` (or where the cursor stands),
    /// skipping events up to `resume_event_index` in that first block.
    ///
    /// Returns once the new-heads subscription is established; blocks are
    /// produced on background tasks.
    pub async fn start(
        &self,
        resume_height: Option<BlockHeight>,
        resume_event_index: Option<EventIndex>,
    ) -> Result<(), IndexerError> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IndexerError::AlreadyStarted);
        }

        let result = self.try_start(resume_height, resume_event_index).await;
        if result.is_err() {
            self.inner.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn try_start(
        &self,
        resume_height: Option<BlockHeight>,
        resume_event_index: Option<EventIndex>,
    ) -> Result<(), IndexerError> {
        let chain_height = self.inner.fetcher.chain_height().await?;

        if let Some(resume) = &resume_height {
            if *resume > chain_height {
                return Err(IndexerError::ResumeAheadOfChain {
                    resume: resume.clone(),
                    chain: chain_height,
                });
            }
        }

        let next_block = {
            let mut cursor = self.inner.cursor.lock().unwrap();
            cursor.begin_run();
            cursor.observe_chain_height(chain_height.clone());
            if let Some(resume) = resume_height {
                cursor.resume_at(resume, resume_event_index);
            }
            cursor.next_block.clone()
        };
        *self.inner.failure.lock().unwrap() = None;
        // The current stream carries on into this run.
        self.inner.close_after_pass.lock().unwrap().take();

        let heads = self.inner.fetcher.subscribe_new_heads().await?;
        let task = tokio::spawn(self.inner.clone().follow_heads(heads));
        if let Some(previous) = self.inner.heads_task.lock().unwrap().replace(task) {
            previous.abort();
        }

        info!(
            next_block = %next_block,
            chain_height = %chain_height,
            "Starting the block producer"
        );

        self.inner.trigger();
        Ok(())
    }

    /// Stop producing.
    ///
    /// Cancels the head subscription. A block fetch in flight is allowed to
    /// finish and be emitted; no further block is fetched afterwards. The
    /// batch stream ends once the last pass has exited, unless the producer
    /// is started again first.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        if self
            .inner
            .started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IndexerError::NotStarted);
        }

        self.inner.halt();
        info!("Block producer stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ProducerStatus {
        let cursor = self.inner.cursor.lock().unwrap();
        ProducerStatus {
            started: self.inner.started.load(Ordering::SeqCst),
            producing: self.inner.producing.load(Ordering::SeqCst),
            next_block: cursor.next_block.clone(),
            chain_height_hint: cursor.chain_height_hint.clone(),
        }
    }

    /// The fatal error that stopped the producer, if any.
    pub fn take_failure(&self) -> Option<IndexerError> {
        self.inner.failure.lock().unwrap().take()
    }
}

impl Inner {
    /// Spawn a production pass unless one is already running or there is nothing to do.
    fn trigger(self: &Arc<Self>) {
        if !self.should_produce() {
            return;
        }
        if self
            .producing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tokio::spawn(self.clone().produce_blocks());
        }
    }

    fn should_produce(&self) -> bool {
        self.started.load(Ordering::SeqCst) && self.cursor.lock().unwrap().has_work()
    }

    async fn produce_blocks(self: Arc<Self>) {
        loop {
            self.drain().await;
            self.producing.store(false, Ordering::SeqCst);

            // A head may have arrived between the last check in `drain` and
            // clearing the flag; pick it up here rather than waiting for the next one.
            if !self.should_produce()
                || self
                    .producing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }

        self.close_marked();
    }

    /// Produce blocks until caught up with the chain height hint or stopped.
    async fn drain(&self) {
        let mut backoff = Backoff::new(self.config.backoff_floor(), self.config.backoff_ceiling());

        while self.started.load(Ordering::SeqCst) {
            let Some((height, run)) = ({
                let cursor = self.cursor.lock().unwrap();
                let pending = cursor.pending_block();
                pending.map(|h| (h, cursor.run()))
            }) else {
                break;
            };

            match self.produce_block(&height, run).await {
                Ok(Produced::Emitted) => backoff.reset(),
                Ok(Produced::Stale) => {
                    debug!(height = %height, "Discarded a block fetched before the producer restarted");
                }
                Ok(Produced::NoConsumer) => {
                    warn!(height = %height, "No consumer for query event blocks, stopping the block producer");
                    self.started.store(false, Ordering::SeqCst);
                    self.halt();
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(height = %height, error = %e, "Stopping the block producer");
                    self.fail(e);
                    break;
                }
                Err(e) => {
                    let delay = backoff.on_failure();
                    warn!(
                        height = %height,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        attempt = backoff.failures(),
                        "An error occurred while producing block"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn produce_block(&self, height: &BlockHeight, run: u64) -> Result<Produced, IndexerError> {
        let fetched = self.fetcher.fetch(height).await?;

        let hash = fetched.hash.clone();
        let header = fetched.header.clone();

        let mut cursor = self.cursor.lock().unwrap();
        if !cursor.accepts(run, height) {
            return Ok(Produced::Stale);
        }
        if let Some(expected) = cursor.parent_mismatch(&header) {
            return Err(IndexerError::UnsupportedReorg {
                block_number: height.clone(),
                expected: expected.clone(),
                actual: header.parent_hash,
            });
        }

        let mut events = fetched.into_query_events();
        let mut resumed_after = None;
        if let Some(processed) = cursor.resume_filter(height) {
            let before = events.len();
            events.retain(|e| e.index > *processed);
            debug!(
                height = %height,
                skipped = before - events.len(),
                "Dropped events handled before resume"
            );
            resumed_after = Some(processed.clone());
        }

        let mut block = QueryEventBlock::new(height.clone(), hash.clone(), events);
        block.resumed_after = resumed_after;
        let emitted = block.len();
        if !self.emit(block) {
            return Ok(Produced::NoConsumer);
        }
        cursor.advance(hash);
        drop(cursor);

        debug!(height = %height, events = emitted, "Emitted query event block");
        Ok(Produced::Emitted)
    }

    /// Hand `block` to the subscriber. Returns `false` if there is none.
    fn emit(&self, block: QueryEventBlock) -> bool {
        let sender = self.sender.lock().unwrap();
        sender.as_ref().is_some_and(|s| s.tx.send(block).is_ok())
    }

    async fn follow_heads(self: Arc<Self>, mut heads: HeaderStream) {
        while let Some(item) = heads.next().await {
            match item {
                Ok(header) => self.on_new_head(header.number),
                Err(e) => warn!(error = %e, "New-heads subscription error"),
            }
        }

        warn!(
            poll_interval_ms = self.config.poll_interval_ms,
            "New-heads subscription ended, polling the finalized head instead"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        while self.started.load(Ordering::SeqCst) {
            ticker.tick().await;
            match self.fetcher.chain_height().await {
                Ok(height) => self.on_new_head(height),
                Err(e) => debug!(error = %e, "Failed to poll the finalized head"),
            }
        }
    }

    fn on_new_head(self: &Arc<Self>, height: BlockHeight) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let raised = {
            let mut cursor = self.cursor.lock().unwrap();
            let current = cursor.chain_height_hint.clone();
            if cursor.observe_chain_height(height.clone()) {
                true
            } else {
                warn!(
                    height = %height,
                    hint = %current,
                    "Chain head moved backwards; possible reorg, keeping the higher height"
                );
                false
            }
        };

        if raised {
            debug!(height = %height, "New block found");
            self.trigger();
        }
    }

    fn fail(&self, error: IndexerError) {
        *self.failure.lock().unwrap() = Some(error);
        self.started.store(false, Ordering::SeqCst);
        self.halt();
    }

    /// Cancel head following and end the current stream once no pass is running.
    ///
    /// `started` must already be cleared.
    fn halt(&self) {
        if let Some(task) = self.heads_task.lock().unwrap().take() {
            task.abort();
        }

        let current = self.sender.lock().unwrap().as_ref().map(|s| s.id);
        *self.close_after_pass.lock().unwrap() = current;
        if !self.producing.load(Ordering::SeqCst) {
            self.close_marked();
        }
    }

    /// Close the subscription marked by `halt`, unless it has been replaced since.
    fn close_marked(&self) {
        let Some(id) = self.close_after_pass.lock().unwrap().take() else {
            return;
        };
        let mut sender = self.sender.lock().unwrap();
        if sender.as_ref().is_some_and(|s| s.id == id) {
            sender.take();
        }
    }
}
