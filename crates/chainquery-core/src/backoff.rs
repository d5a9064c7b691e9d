//! Exponential backoff for block fetch retries.

use std::time::Duration;

/// Retry delay state: starts at `floor`, doubles after every failure up to
/// `ceiling`, and drops back to `floor` after a success.
///
/// The delay returned for the i-th consecutive failure is
/// `min(floor * 2^(i-1), ceiling)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    /// `ceiling` is raised to `floor` if given lower.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
            failures: 0,
        }
    }

    /// Delay that the next failure will wait for.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Number of consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Register a failure; returns how long to wait before retrying.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Register a success.
    pub fn reset(&mut self) {
        self.current = self.floor;
        self.failures = 0;
    }
}
