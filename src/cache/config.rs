//! Cache configuration.

use std::time::Duration;

/// How often the in-memory store purges expired entries by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Settings shared by a [`QueryCache`](super::QueryCache) and the default store it builds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use reqcache::cache::CacheConfig;
///
/// let config = CacheConfig::new().with_sweep_interval(Duration::from_secs(5));
/// assert_eq!(config.sweep_interval, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Interval of the background expiry sweep. `Duration::ZERO` disables the sweep,
    /// leaving only lazy expiry on read.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Returns `true` if the background sweep should run.
    pub fn sweep_enabled(&self) -> bool {
        !self.sweep_interval.is_zero()
    }
}
