//! The `QueryService` trait: the contract the block producer fetches through.
//!
//! Implementations wrap a node RPC/WS client. None of the calls are expected to
//! carry their own timeout; the producer bounds every call itself.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::QueryError;
use crate::height::BlockHeight;
use crate::types::{EventRecord, Hash, Header, SignedBlock};

/// Stream of new chain heads. Dropping it unsubscribes.
pub type HeaderStream = Pin<Box<dyn Stream<Item = Result<Header, QueryError>> + Send>>;

/// Read access to a chain node.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the producer shares one instance
/// between its production passes and its head-subscription task.
#[async_trait]
pub trait QueryService: Send + Sync + 'static {
    /// Hash of the latest finalized block.
    async fn finalized_head(&self) -> Result<Hash, QueryError>;

    /// Header of the block with the given hash.
    async fn header(&self, hash: &Hash) -> Result<Header, QueryError>;

    /// Canonical hash of the block at `height`.
    async fn block_hash(&self, height: &BlockHeight) -> Result<Hash, QueryError>;

    /// Full block (header + extrinsics) for `hash`.
    async fn block(&self, hash: &Hash) -> Result<SignedBlock, QueryError>;

    /// Event records deposited by the block `hash`, in on-chain order.
    async fn events_at(&self, hash: &Hash) -> Result<Vec<EventRecord>, QueryError>;

    /// Subscribe to new chain heads.
    async fn subscribe_new_heads(&self) -> Result<HeaderStream, QueryError>;

    /// Convenience: the number of the latest finalized block.
    async fn finalized_height(&self) -> Result<BlockHeight, QueryError> {
        let hash = self.finalized_head().await?;
        Ok(self.header(&hash).await?.number)
    }
}
