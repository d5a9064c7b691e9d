//! chainquery-node: runs the ChainQuery pipeline.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainquery_node::{IndexerBuilder, QueryNodeManager};
//! # async fn run(
//! #     query: Arc<dyn chainquery_core::QueryService>,
//! #     connector: Arc<dyn chainquery_core::StoreConnector>,
//! #     pack: chainquery_core::ProcessingPack,
//! # ) -> Result<(), chainquery_core::IndexerError> {
//! let options = IndexerBuilder::new()
//!     .processor_id("balances")
//!     .at_block(1_000_000u64)
//!     .fetch_timeout_ms(10_000)
//!     .into_options(query, connector, pack);
//!
//! let manager = QueryNodeManager::new();
//! manager.index(options).await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod builder;
pub mod config;
pub mod logging;
pub mod manager;
pub mod options;

pub use bootstrap::Bootstrapper;
pub use builder::IndexerBuilder;
pub use config::IndexerConfig;
pub use logging::{init_tracing, LogConfig};
pub use manager::{ManagerState, QueryNodeManager};
pub use options::{BootstrapOptions, IndexerOptions, ProcessorOptions};
