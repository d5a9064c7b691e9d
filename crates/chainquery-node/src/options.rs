//! Inputs of the three manager modes.

use std::sync::Arc;

use tokio::sync::mpsc;

use chainquery_core::handler::ProcessingPack;
use chainquery_core::height::BlockHeight;
use chainquery_core::service::QueryService;
use chainquery_core::store::StoreConnector;
use chainquery_core::types::QueryEventBlock;

use crate::bootstrap::Bootstrapper;
use crate::config::IndexerConfig;

/// Index mode: follow the chain and process everything it produces.
pub struct IndexerOptions {
    pub query: Arc<dyn QueryService>,
    pub connector: Arc<dyn StoreConnector>,
    pub pack: ProcessingPack,
    pub config: IndexerConfig,
}

/// Process mode: run the processor over batches produced elsewhere.
pub struct ProcessorOptions {
    pub connector: Arc<dyn StoreConnector>,
    pub pack: ProcessingPack,
    pub processor_id: String,
    /// Skip batches below this height; `None` resumes from the checkpoint.
    pub at_block: Option<BlockHeight>,
    pub blocks: mpsc::UnboundedReceiver<QueryEventBlock>,
}

/// Bootstrap mode: seed the store once before indexing.
pub struct BootstrapOptions {
    pub connector: Arc<dyn StoreConnector>,
    pub bootstrapper: Arc<dyn Bootstrapper>,
    /// Height the seeded state corresponds to, if any.
    pub at_block: Option<BlockHeight>,
}
