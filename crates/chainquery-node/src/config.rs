//! Indexer configuration, loadable from YAML or JSON.
//!
//! ```yaml
//! processor_id: balances
//! at_block: "1000000"
//! at_event: 3
//! producer:
//!   fetch_timeout_ms: 10000
//!   backoff_floor_ms: 500
//! log:
//!   level: info
//!   components:
//!     chainquery-producer: debug
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use chainquery_core::config::ProducerConfig;
use chainquery_core::error::IndexerError;
use chainquery_core::height::{BlockHeight, EventIndex};

use crate::logging::LogConfig;

/// Configuration for one indexer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name of the processor (checkpoint key).
    #[serde(default = "default_processor_id")]
    pub processor_id: String,
    /// Height to resume at. `None` resumes from the stored checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_block: Option<BlockHeight>,
    /// Last event already handled at `at_block`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_event: Option<EventIndex>,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_processor_id() -> String {
    "default".into()
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            processor_id: default_processor_id(),
            at_block: None,
            at_event: None,
            producer: ProducerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, IndexerError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| IndexerError::Config(format!("invalid YAML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, IndexerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IndexerError::Config(format!("invalid JSON config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("cannot read {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            _ => Err(IndexerError::Config(format!(
                "unsupported config file extension: {}",
                path.display()
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.processor_id.is_empty() {
            return Err(IndexerError::Config("processor_id must not be empty".into()));
        }
        if self.at_event.is_some() && self.at_block.is_none() {
            return Err(IndexerError::Config("at_event requires at_block".into()));
        }
        if self.producer.fetch_timeout_ms == 0 {
            return Err(IndexerError::Config("producer.fetch_timeout_ms must be positive".into()));
        }
        if self.producer.backoff_floor_ms == 0 {
            return Err(IndexerError::Config("producer.backoff_floor_ms must be positive".into()));
        }
        Ok(())
    }
}
