//! Block producer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for a block producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Upper bound on every single query-service call (milliseconds).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// First retry delay after a failed block fetch (milliseconds).
    #[serde(default = "default_backoff_floor_ms")]
    pub backoff_floor_ms: u64,
    /// Maximum retry delay (milliseconds).
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    /// Head polling interval used when the new-heads subscription ends (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_fetch_timeout_ms() -> u64 { 5_000 }
fn default_backoff_floor_ms() -> u64 { 250 }
fn default_backoff_ceiling_ms() -> u64 { 30 * 60 * 1_000 }
fn default_poll_interval_ms() -> u64 { 100 }

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            backoff_floor_ms: default_backoff_floor_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ProducerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ProducerConfig::default();
        assert_eq!(cfg.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.backoff_floor(), Duration::from_millis(250));
        assert_eq!(cfg.backoff_ceiling(), Duration::from_secs(1800));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ProducerConfig = serde_json::from_str(r#"{"fetch_timeout_ms": 1000}"#).unwrap();
        assert_eq!(cfg.fetch_timeout_ms, 1000);
        assert_eq!(cfg.backoff_floor_ms, 250);
    }
}
