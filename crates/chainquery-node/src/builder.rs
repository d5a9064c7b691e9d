//! Fluent builder API for indexer runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainquery_node::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .processor_id("balances")
//!     .at_block(1_000_000u64)
//!     .at_event(4u64)
//!     .backoff_ms(500, 60_000)
//!     .build_config();
//! ```

use std::sync::Arc;

use chainquery_core::handler::ProcessingPack;
use chainquery_core::height::{BlockHeight, EventIndex};
use chainquery_core::service::QueryService;
use chainquery_core::store::StoreConnector;

use crate::config::IndexerConfig;
use crate::logging::LogConfig;
use crate::options::IndexerOptions;

/// Fluent builder for `IndexerConfig`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from a file.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Set the processor ID (used for checkpoint keys).
    pub fn processor_id(mut self, id: impl Into<String>) -> Self {
        self.config.processor_id = id.into();
        self
    }

    /// Resume at this height instead of the stored checkpoint.
    pub fn at_block(mut self, block: impl Into<BlockHeight>) -> Self {
        self.config.at_block = Some(block.into());
        self
    }

    /// Skip events up to this index in the resume block.
    pub fn at_event(mut self, index: impl Into<EventIndex>) -> Self {
        self.config.at_event = Some(index.into());
        self
    }

    /// Set the per-call query timeout in milliseconds.
    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.producer.fetch_timeout_ms = ms;
        self
    }

    /// Set the retry backoff floor and ceiling in milliseconds.
    pub fn backoff_ms(mut self, floor: u64, ceiling: u64) -> Self {
        self.config.producer.backoff_floor_ms = floor;
        self.config.producer.backoff_ceiling_ms = ceiling;
        self
    }

    /// Set the head polling interval used after the subscription drops.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.producer.poll_interval_ms = ms;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Bundle the configuration with its collaborators for [`QueryNodeManager::index`](crate::QueryNodeManager::index).
    pub fn into_options(
        self,
        query: Arc<dyn QueryService>,
        connector: Arc<dyn StoreConnector>,
        pack: ProcessingPack,
    ) -> IndexerOptions {
        IndexerOptions {
            query,
            connector,
            pack,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.processor_id, "default");
        assert!(cfg.at_block.is_none());
        assert_eq!(cfg.producer.fetch_timeout_ms, 5_000);
        assert_eq!(cfg.producer.backoff_ceiling_ms, 1_800_000);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .processor_id("staking")
            .at_block(19_000_000u64)
            .at_event(2u64)
            .fetch_timeout_ms(1_000)
            .backoff_ms(100, 5_000)
            .poll_interval_ms(50)
            .build_config();

        assert_eq!(cfg.processor_id, "staking");
        assert_eq!(cfg.at_block, Some(19_000_000u64.into()));
        assert_eq!(cfg.at_event, Some(2u64.into()));
        assert_eq!(cfg.producer.fetch_timeout_ms, 1_000);
        assert_eq!(cfg.producer.backoff_floor_ms, 100);
        assert_eq!(cfg.producer.backoff_ceiling_ms, 5_000);
        assert_eq!(cfg.producer.poll_interval_ms, 50);
        assert!(cfg.validate().is_ok());
    }
}
