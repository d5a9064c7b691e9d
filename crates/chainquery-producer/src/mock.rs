//! Scripted in-memory [`QueryService`] for tests.
//!
//! Blocks are numbered from 0; block `n` has hash `0x{n}` and parent `0x{n-1}`.
//! Individual block-hash lookups can be scripted to fail, hang or stall.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use chainquery_core::error::QueryError;
use chainquery_core::height::BlockHeight;
use chainquery_core::service::{HeaderStream, QueryService};
use chainquery_core::types::{EventRecord, Extrinsic, Hash, Header, Phase, RawEvent, SignedBlock};

/// Contents of one mock block.
#[derive(Debug, Clone, Default)]
pub struct MockBlock {
    pub records: Vec<EventRecord>,
    pub extrinsics: Vec<Extrinsic>,
    /// Overrides the parent hash reported in the header.
    pub parent_hash: Option<Hash>,
}

impl MockBlock {
    /// A block with `n` finalization-phase events named `Event{i}` in section `test`.
    pub fn with_events(n: usize) -> Self {
        Self {
            records: (0..n).map(|i| record("test", &format!("Event{i}"), Phase::Finalization)).collect(),
            ..Default::default()
        }
    }
}

/// Build an event record.
pub fn record(section: &str, method: &str, phase: Phase) -> EventRecord {
    EventRecord {
        phase,
        event: RawEvent {
            section: section.into(),
            method: method.into(),
            data: serde_json::json!({}),
        },
        topics: vec![],
    }
}

/// Build a signed extrinsic.
pub fn extrinsic(section: &str, method: &str) -> Extrinsic {
    Extrinsic {
        hash: format!("0x{section}{method}"),
        section: section.into(),
        method: method.into(),
        signer: Some("5GrwvaEF".into()),
        args: serde_json::json!({}),
    }
}

pub fn block_hash_of(n: u64) -> Hash {
    format!("0x{n}")
}

#[derive(Default)]
struct State {
    blocks: Vec<MockBlock>,
    fail_hash: HashMap<u64, u32>,
    hang_hash: HashMap<u64, u32>,
    delay_hash: HashMap<u64, Duration>,
    reject_hash: HashMap<u64, u32>,
    calls: Vec<(u64, Instant)>,
    heads: Option<mpsc::UnboundedSender<Result<Header, QueryError>>>,
}

/// In-memory chain.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    /// Chain with `height + 1` empty blocks (0..=height).
    pub fn with_height(height: u64) -> Self {
        let chain = Self::default();
        for _ in 0..=height {
            chain.push_block(MockBlock::default());
        }
        chain
    }

    /// Append a block without announcing it.
    pub fn push_block(&self, block: MockBlock) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.blocks.push(block);
        state.blocks.len() as u64 - 1
    }

    /// Replace the contents of block `n`.
    pub fn set_block(&self, n: u64, block: MockBlock) {
        self.state.lock().unwrap().blocks[n as usize] = block;
    }

    /// Append a block and announce it on the new-heads subscription.
    pub fn produce(&self, block: MockBlock) -> u64 {
        let n = self.push_block(block);
        self.announce(n);
        n
    }

    /// Send a new head for height `n` (which may be lower than the tip).
    pub fn announce(&self, n: u64) {
        let header = self.header_of(n);
        if let Some(tx) = &self.state.lock().unwrap().heads {
            let _ = tx.send(Ok(header));
        }
    }

    /// End the new-heads subscription, as a dropped WS connection would.
    pub fn drop_subscription(&self) {
        self.state.lock().unwrap().heads = None;
    }

    /// Make the next `times` block-hash lookups at `n` fail.
    pub fn fail_block_hash(&self, n: u64, times: u32) {
        self.state.lock().unwrap().fail_hash.insert(n, times);
    }

    /// Make the next `times` block-hash lookups at `n` never resolve.
    pub fn hang_block_hash(&self, n: u64, times: u32) {
        self.state.lock().unwrap().hang_hash.insert(n, times);
    }

    /// Make the next block-hash lookup at `n` fail with a non-retryable error.
    pub fn reject_block_hash(&self, n: u64) {
        self.state.lock().unwrap().reject_hash.insert(n, 1);
    }

    /// Make the next block-hash lookup at `n` take `delay` before answering.
    pub fn delay_block_hash(&self, n: u64, delay: Duration) {
        self.state.lock().unwrap().delay_hash.insert(n, delay);
    }

    /// Every block-hash lookup so far: (height, time).
    pub fn hash_calls(&self) -> Vec<(u64, Instant)> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Instants of the block-hash lookups at height `n`.
    pub fn hash_calls_at(&self, n: u64) -> Vec<Instant> {
        self.hash_calls()
            .into_iter()
            .filter(|(h, _)| *h == n)
            .map(|(_, t)| t)
            .collect()
    }

    fn tip(&self) -> u64 {
        (self.state.lock().unwrap().blocks.len() as u64).saturating_sub(1)
    }

    fn header_of(&self, n: u64) -> Header {
        let parent = self.state.lock().unwrap().blocks.get(n as usize).and_then(|b| b.parent_hash.clone());
        Header {
            number: n.into(),
            hash: block_hash_of(n),
            parent_hash: parent.unwrap_or_else(|| {
                if n == 0 {
                    "0x00".into()
                } else {
                    block_hash_of(n - 1)
                }
            }),
        }
    }

    fn number_of(&self, hash: &Hash) -> Result<u64, QueryError> {
        let n: u64 = hash
            .strip_prefix("0x")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| QueryError::NotFound(hash.clone()))?;
        if n > self.tip() {
            return Err(QueryError::NotFound(hash.clone()));
        }
        Ok(n)
    }
}

fn take_one(map: &mut HashMap<u64, u32>, n: u64) -> bool {
    match map.get_mut(&n) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl QueryService for MockChain {
    async fn finalized_head(&self) -> Result<Hash, QueryError> {
        Ok(block_hash_of(self.tip()))
    }

    async fn header(&self, hash: &Hash) -> Result<Header, QueryError> {
        let n = self.number_of(hash)?;
        Ok(self.header_of(n))
    }

    async fn block_hash(&self, height: &BlockHeight) -> Result<Hash, QueryError> {
        let n = height
            .to_u64()
            .ok_or_else(|| QueryError::NotFound(height.to_string()))?;
        let (fail, hang, delay, reject) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((n, Instant::now()));
            let fail = take_one(&mut state.fail_hash, n);
            let hang = !fail && take_one(&mut state.hang_hash, n);
            let reject = take_one(&mut state.reject_hash, n);
            (fail, hang, state.delay_hash.remove(&n), reject)
        };
        if reject {
            return Err(QueryError::Subscription(format!("request channel closed fetching {n}")));
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(QueryError::Transport(format!("connection reset fetching {n}")));
        }
        if hang {
            futures::future::pending::<()>().await;
        }
        if n > self.tip() {
            return Err(QueryError::NotFound(height.to_string()));
        }
        Ok(block_hash_of(n))
    }

    async fn block(&self, hash: &Hash) -> Result<SignedBlock, QueryError> {
        let n = self.number_of(hash)?;
        let extrinsics = self.state.lock().unwrap().blocks[n as usize].extrinsics.clone();
        Ok(SignedBlock {
            header: self.header_of(n),
            extrinsics,
        })
    }

    async fn events_at(&self, hash: &Hash) -> Result<Vec<EventRecord>, QueryError> {
        let n = self.number_of(hash)?;
        Ok(self.state.lock().unwrap().blocks[n as usize].records.clone())
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream, QueryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().heads = Some(tx);
        let heads = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|h| (h, rx)) });
        Ok(Box::pin(heads))
    }
}
