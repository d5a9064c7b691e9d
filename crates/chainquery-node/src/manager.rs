//! The query node manager: wires producer, processor and store together.
//!
//! # Modes
//! - `index`: open the store, resolve the resume point, start a
//!   [`BlockProducer`] and feed its batches to a [`MappingsProcessor`] until
//!   shutdown or a fatal error
//! - `bootstrap`: run a [`Bootstrapper`] once and commit its writes
//! - `process`: run only the processor over an external batch stream
//!
//! A manager runs a single mode once: `Idle → {Indexing | Processing |
//! Bootstrapping} → {Stopped | Crashed}`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use chainquery_core::context::PersistenceContext;
use chainquery_core::error::IndexerError;
use chainquery_core::height::{BlockHeight, EventIndex};
use chainquery_processor::{MappingsProcessor, ProcessingStats};
use chainquery_producer::{BlockProducer, ProducerStatus};

use crate::bootstrap::Bootstrapper;
use crate::options::{BootstrapOptions, IndexerOptions, ProcessorOptions};

/// Lifecycle of a [`QueryNodeManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerState {
    /// Not yet started.
    Idle,
    /// Following the chain and processing blocks.
    Indexing,
    /// Processing an externally supplied stream.
    Processing,
    /// Seeding the store.
    Bootstrapping,
    /// Finished or shut down cleanly.
    Stopped,
    /// Ended with a fatal error.
    Crashed,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Indexing => write!(f, "indexing"),
            Self::Processing => write!(f, "processing"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

/// Orchestrates one run of the pipeline.
///
/// Share it behind an `Arc` to call [`shutdown`](Self::shutdown) from another
/// task while a mode is running.
pub struct QueryNodeManager {
    state: Mutex<ManagerState>,
    shutdown: watch::Sender<bool>,
    producer: Mutex<Option<BlockProducer>>,
}

impl Default for QueryNodeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryNodeManager {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(ManagerState::Idle),
            shutdown,
            producer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap()
    }

    /// Status of the running block producer (index mode only).
    pub fn producer_status(&self) -> Option<ProducerStatus> {
        self.producer.lock().unwrap().as_ref().map(|p| p.status())
    }

    /// Follow the chain and process every block until shutdown or a fatal error.
    pub async fn index(&self, options: IndexerOptions) -> Result<ProcessingStats, IndexerError> {
        self.begin(ManagerState::Indexing)?;
        let result = self.run_index(options).await;
        self.finish(&result);
        result
    }

    /// Run `options.bootstrapper` once and commit its writes atomically.
    ///
    /// Returns the number of entity writes committed.
    pub async fn bootstrap(&self, options: BootstrapOptions) -> Result<usize, IndexerError> {
        self.begin(ManagerState::Bootstrapping)?;
        let result = self.run_bootstrap(options).await;
        self.finish(&result);
        result
    }

    /// Run the processor alone over `options.blocks`.
    pub async fn process(&self, options: ProcessorOptions) -> Result<ProcessingStats, IndexerError> {
        self.begin(ManagerState::Processing)?;
        let result = self.run_process(options).await;
        self.finish(&result);
        result
    }

    /// Ask the running mode to stop after the block in progress.
    pub fn shutdown(&self) {
        info!(state = %self.state(), "Shutdown requested");
        self.shutdown.send_replace(true);
    }

    fn begin(&self, next: ManagerState) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        if *state != ManagerState::Idle {
            return Err(IndexerError::AlreadyStarted);
        }
        *state = next;
        Ok(())
    }

    fn finish<T>(&self, result: &Result<T, IndexerError>) {
        let mut state = self.state.lock().unwrap();
        let mode = *state;
        *state = match result {
            Ok(_) => ManagerState::Stopped,
            Err(e) => {
                error!(mode = %mode, error = %e, "Query node crashed");
                ManagerState::Crashed
            }
        };
    }

    async fn run_index(&self, options: IndexerOptions) -> Result<ProcessingStats, IndexerError> {
        let IndexerOptions {
            query,
            connector,
            pack,
            config,
        } = options;
        config.validate()?;

        let store = connector.connect().await?;
        let mut processor = MappingsProcessor::create(config.processor_id.clone(), &pack, store)?;
        let checkpoint = processor.load_checkpoint().await?;

        let (resume_height, resume_index): (Option<BlockHeight>, Option<EventIndex>) =
            match (&config.at_block, checkpoint) {
                (Some(height), _) => (Some(height.clone()), config.at_event.clone()),
                (None, Some(cp)) => (Some(cp.block_number), cp.event_index),
                (None, None) => (None, None),
            };
        info!(
            processor = %config.processor_id,
            pack = %pack.name,
            resume_height = ?resume_height.as_ref().map(|h| h.to_string()),
            resume_index = ?resume_index.as_ref().map(|i| i.to_string()),
            "Starting indexer"
        );

        let producer = BlockProducer::new(query, config.producer.clone());
        let blocks = producer.subscribe();
        producer.start(resume_height, resume_index).await?;
        *self.producer.lock().unwrap() = Some(producer.clone());

        let result = processor
            .run(blocks, config.at_block.clone(), self.shutdown.subscribe())
            .await;

        if producer.is_started() {
            if let Err(e) = producer.stop().await {
                warn!(error = %e, "Failed to stop the block producer");
            }
        }
        self.producer.lock().unwrap().take();

        if let Some(failure) = producer.take_failure() {
            return Err(failure);
        }
        result
    }

    async fn run_bootstrap(&self, options: BootstrapOptions) -> Result<usize, IndexerError> {
        let store = options.connector.connect().await?;
        let bootstrapper: &dyn Bootstrapper = options.bootstrapper.as_ref();

        let mut ctx = PersistenceContext::new(store.clone(), options.at_block);
        bootstrapper.bootstrap(&mut ctx).await?;

        let writes = ctx.pending();
        store.commit(ctx.into_batch(None)).await?;
        info!(bootstrapper = bootstrapper.name(), writes, "Bootstrap committed");
        Ok(writes)
    }

    async fn run_process(&self, options: ProcessorOptions) -> Result<ProcessingStats, IndexerError> {
        let store = options.connector.connect().await?;
        let mut processor = MappingsProcessor::create(options.processor_id, &options.pack, store)?;
        processor
            .run(options.blocks, options.at_block, self.shutdown.subscribe())
            .await
    }
}

impl Drop for QueryNodeManager {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chainquery_core::checkpoint::Checkpoint;
    use chainquery_core::handler::{EventHandler, ProcessingPack};
    use chainquery_core::store::{Store, StoreConnector, WriteBatch};
    use chainquery_core::types::{Phase, QueryEvent, QueryEventBlock};
    use chainquery_producer::mock::{record, MockBlock, MockChain};
    use chainquery_storage::{MemoryConnector, MemoryStore};
    use tokio::sync::mpsc;

    use crate::builder::IndexerBuilder;

    /// Stores one `event` entity per handled event, keyed `height-index`.
    struct RecordEvents;

    #[async_trait]
    impl EventHandler for RecordEvents {
        fn event_type(&self) -> &str {
            "balances.Transfer"
        }

        async fn handle(
            &self,
            event: &QueryEvent,
            ctx: &mut PersistenceContext,
        ) -> Result<(), IndexerError> {
            ctx.put(
                "event",
                format!("{}-{}", event.block_number, event.index),
                serde_json::json!({ "type": event.event_type() }),
            );
            Ok(())
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl StoreConnector for FailingConnector {
        async fn connect(&self) -> Result<Arc<dyn Store>, IndexerError> {
            Err(IndexerError::Storage("connection refused".into()))
        }
    }

    fn pack() -> ProcessingPack {
        ProcessingPack::new("transfers").on_event(Arc::new(RecordEvents))
    }

    fn transfers(n: usize) -> MockBlock {
        MockBlock {
            records: (0..n)
                .map(|_| record("balances", "Transfer", Phase::Finalization))
                .collect(),
            ..Default::default()
        }
    }

    fn chain() -> Arc<MockChain> {
        let chain = Arc::new(MockChain::with_height(0));
        chain.push_block(transfers(1));
        chain.push_block(transfers(2));
        chain.push_block(transfers(3));
        chain
    }

    async fn wait_for_checkpoint(store: &MemoryStore, processor_id: &str, height: u64) {
        for _ in 0..1_000 {
            if let Some(cp) = store.load_checkpoint(processor_id).await.unwrap() {
                if cp.block_number >= BlockHeight::from(height) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("checkpoint never reached height {height}");
    }

    fn event_ids(store: &MemoryStore) -> Vec<String> {
        let mut ids: Vec<_> = store.entities_of_kind("event").into_keys().collect();
        ids.sort();
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn index_processes_chain_until_shutdown() {
        let chain = chain();
        let connector = MemoryConnector::new();
        let store = connector.store();
        let manager = Arc::new(QueryNodeManager::new());

        let options = IndexerBuilder::new()
            .processor_id("p")
            .into_options(chain.clone(), Arc::new(connector), pack());
        let m = manager.clone();
        let run = tokio::spawn(async move { m.index(options).await });

        wait_for_checkpoint(&store, "p", 3).await;
        assert_eq!(manager.state(), ManagerState::Indexing);
        assert_eq!(manager.producer_status().unwrap().next_block, BlockHeight::from(4u64));

        chain.produce(transfers(1));
        wait_for_checkpoint(&store, "p", 4).await;

        manager.shutdown();
        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.blocks, 5);
        assert_eq!(stats.handled_events, 7);
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.producer_status().is_none());
        assert_eq!(event_ids(&store).len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn index_resumes_from_checkpoint_inside_block() {
        let chain = chain();
        let store = Arc::new(MemoryStore::new());
        store
            .commit(WriteBatch {
                writes: vec![],
                checkpoint: Some(Checkpoint {
                    processor_id: "p".into(),
                    block_number: 2u64.into(),
                    event_index: Some(0u64.into()),
                    updated_at: 0,
                }),
            })
            .await
            .unwrap();

        let manager = Arc::new(QueryNodeManager::new());
        let options = IndexerBuilder::new().processor_id("p").into_options(
            chain,
            Arc::new(MemoryConnector::with_store(store.clone())),
            pack(),
        );
        let m = manager.clone();
        let run = tokio::spawn(async move { m.index(options).await });

        wait_for_checkpoint(&store, "p", 3).await;
        manager.shutdown();
        run.await.unwrap().unwrap();

        assert_eq!(event_ids(&store), vec!["2-1", "3-0", "3-1", "3-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_resume_point_overrides_checkpoint() {
        let chain = chain();
        let connector = MemoryConnector::new();
        let store = connector.store();
        let manager = Arc::new(QueryNodeManager::new());

        let options = IndexerBuilder::new()
            .processor_id("p")
            .at_block(3u64)
            .at_event(1u64)
            .into_options(chain, Arc::new(connector), pack());
        let m = manager.clone();
        let run = tokio::spawn(async move { m.index(options).await });

        wait_for_checkpoint(&store, "p", 3).await;
        manager.shutdown();
        run.await.unwrap().unwrap();
        assert_eq!(event_ids(&store), vec!["3-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_past_last_event_is_not_replayed_on_restart() {
        let chain = Arc::new(MockChain::with_height(1));
        chain.push_block(transfers(3));
        let store = Arc::new(MemoryStore::new());

        let manager = Arc::new(QueryNodeManager::new());
        let options = IndexerBuilder::new()
            .processor_id("p")
            .at_block(2u64)
            .at_event(5u64)
            .into_options(chain.clone(), Arc::new(MemoryConnector::with_store(store.clone())), pack());
        let m = manager.clone();
        let run = tokio::spawn(async move { m.index(options).await });
        wait_for_checkpoint(&store, "p", 2).await;
        manager.shutdown();
        run.await.unwrap().unwrap();

        let cp = store.load_checkpoint("p").await.unwrap().unwrap();
        assert_eq!(cp.event_index, Some(EventIndex::from(5u64)));
        assert!(event_ids(&store).is_empty());

        // Restart from the checkpoint alone.
        let manager = Arc::new(QueryNodeManager::new());
        let options = IndexerBuilder::new().processor_id("p").into_options(
            chain.clone(),
            Arc::new(MemoryConnector::with_store(store.clone())),
            pack(),
        );
        let m = manager.clone();
        let run = tokio::spawn(async move { m.index(options).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        chain.produce(transfers(1));
        wait_for_checkpoint(&store, "p", 3).await;
        manager.shutdown();
        run.await.unwrap().unwrap();

        assert_eq!(event_ids(&store), vec!["3-0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_ahead_of_chain_crashes() {
        let manager = QueryNodeManager::new();
        let options = IndexerBuilder::new().at_block(10u64).into_options(
            Arc::new(MockChain::with_height(7)),
            Arc::new(MemoryConnector::new()),
            pack(),
        );

        let err = manager.index(options).await.unwrap_err();
        assert!(matches!(err, IndexerError::ResumeAheadOfChain { .. }));
        assert_eq!(manager.state(), ManagerState::Crashed);
    }

    #[tokio::test(start_paused = true)]
    async fn store_connection_failure_is_fatal() {
        let manager = QueryNodeManager::new();
        let options = IndexerBuilder::new().into_options(
            Arc::new(MockChain::with_height(1)),
            Arc::new(FailingConnector),
            pack(),
        );

        let err = manager.index(options).await.unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
        assert_eq!(manager.state(), ManagerState::Crashed);
    }

    #[tokio::test(start_paused = true)]
    async fn reorg_ends_the_run_with_its_error() {
        let chain = chain();
        chain.set_block(
            2,
            MockBlock {
                parent_hash: Some("0xdead".into()),
                ..transfers(2)
            },
        );
        let connector = MemoryConnector::new();
        let store = connector.store();
        let manager = QueryNodeManager::new();
        let options = IndexerBuilder::new()
            .processor_id("p")
            .into_options(chain, Arc::new(connector), pack());

        let err = manager.index(options).await.unwrap_err();
        assert!(err.is_reorg());
        assert_eq!(manager.state(), ManagerState::Crashed);
        assert_eq!(
            store.load_checkpoint("p").await.unwrap().unwrap().block_number,
            BlockHeight::from(1u64)
        );
    }

    #[tokio::test]
    async fn second_mode_is_rejected() {
        let manager = QueryNodeManager::new();
        let (tx, rx) = mpsc::unbounded_channel::<QueryEventBlock>();
        drop(tx);
        manager
            .process(ProcessorOptions {
                connector: Arc::new(MemoryConnector::new()),
                pack: pack(),
                processor_id: "p".into(),
                at_block: None,
                blocks: rx,
            })
            .await
            .unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);

        let (_tx, rx) = mpsc::unbounded_channel();
        let err = manager
            .process(ProcessorOptions {
                connector: Arc::new(MemoryConnector::new()),
                pack: pack(),
                processor_id: "p".into(),
                at_block: None,
                blocks: rx,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn process_mode_consumes_external_stream() {
        let connector = MemoryConnector::new();
        let store = connector.store();
        let manager = QueryNodeManager::new();

        let chain = chain();
        let producer = BlockProducer::new(chain, Default::default());
        let blocks = producer.subscribe();
        producer.start(Some(1u64.into()), None).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let forward = tokio::spawn(async move {
            let mut blocks = blocks;
            for _ in 0..3 {
                if let Some(b) = blocks.recv().await {
                    tx.send(b).unwrap();
                }
            }
        });

        let stats = manager
            .process(ProcessorOptions {
                connector: Arc::new(connector),
                pack: pack(),
                processor_id: "p".into(),
                at_block: Some(2u64.into()),
                blocks: rx,
            })
            .await
            .unwrap();
        forward.await.unwrap();

        assert_eq!(stats.skipped_blocks, 1);
        assert_eq!(stats.blocks, 2);
        assert_eq!(event_ids(&store), vec!["2-0", "2-1", "3-0", "3-1", "3-2"]);
        producer.stop().await.unwrap();
    }

    struct Genesis {
        fail: bool,
    }

    #[async_trait]
    impl Bootstrapper for Genesis {
        fn name(&self) -> &str {
            "genesis"
        }

        async fn bootstrap(&self, ctx: &mut PersistenceContext) -> Result<(), IndexerError> {
            ctx.put("account", "alice", serde_json::json!({ "free": 1_000 }));
            ctx.put("account", "bob", serde_json::json!({ "free": 500 }));
            if self.fail {
                return Err(IndexerError::Aborted {
                    reason: "genesis file truncated".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn bootstrap_commits_all_or_nothing() {
        let connector = MemoryConnector::new();
        let store = connector.store();
        let connector = Arc::new(connector);

        let failing = QueryNodeManager::new();
        let err = failing
            .bootstrap(BootstrapOptions {
                connector: connector.clone(),
                bootstrapper: Arc::new(Genesis { fail: true }),
                at_block: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Aborted { .. }));
        assert_eq!(store.entity_count(), 0);
        assert_eq!(failing.state(), ManagerState::Crashed);

        let manager = QueryNodeManager::new();
        let writes = manager
            .bootstrap(BootstrapOptions {
                connector,
                bootstrapper: Arc::new(Genesis { fail: false }),
                at_block: Some(0u64.into()),
            })
            .await
            .unwrap();
        assert_eq!(writes, 2);
        assert_eq!(store.entities_of_kind("account").len(), 2);
        assert_eq!(manager.state(), ManagerState::Stopped);
    }
}
