//! Per-bin throttle limits.

use std::time::Duration;

use tokio::sync::Semaphore;

/// Default number of concurrent fetches per bin.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Limits applied to one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleSpec {
    /// Fetches that may run at the same time.
    pub max_concurrent: usize,
    /// Minimum time between two fetch starts.
    pub min_interval: Duration,
    /// Byte rate shared by all fetches in the bin; `None` means unlimited.
    pub bytes_per_second: Option<u64>,
}

impl Default for ThrottleSpec {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_interval: Duration::ZERO,
            bytes_per_second: None,
        }
    }
}

impl ThrottleSpec {
    /// Creates a spec with the given concurrency and no pacing.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Self::default()
        }
    }

    /// Sets the minimum interval between fetch starts.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the byte rate.
    #[must_use]
    pub fn with_bytes_per_second(mut self, rate: u64) -> Self {
        self.bytes_per_second = Some(rate);
        self
    }

    /// Returns the concurrency, never less than one and never more than a
    /// semaphore can hold.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent.clamp(1, Semaphore::MAX_PERMITS)
    }
}
