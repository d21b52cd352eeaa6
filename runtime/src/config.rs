//! Engine configuration.
//!
//! Tunables for the admission engine with defaults suitable for production:
//!
//! - `admission_window`: 24 hours to answer an invitation
//! - `conflict_retry`: 3 retries, 5ms initial delay, 50ms cap
//! - `sweep_interval`: 30 seconds between background sweeps

use crate::retry::RetryPolicy;
use chrono::Duration;

/// Shortest period the background sweep runs at; shorter settings are raised to it.
pub const MIN_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Configuration for [`WaitlistEngine`](crate::WaitlistEngine) and its sweeper.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a notified user has to respond
    pub admission_window: Duration,
    /// Retry bound for promotions and expiries that lose a version race
    pub conflict_retry: RetryPolicy,
    /// Period of the background expiry sweep
    pub sweep_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admission_window: Duration::hours(24),
            conflict_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(std::time::Duration::from_millis(5))
                .max_delay(std::time::Duration::from_millis(50))
                .multiplier(2.0)
                .build(),
            sweep_interval: std::time::Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission window.
    #[must_use]
    pub const fn with_admission_window(mut self, window: Duration) -> Self {
        self.admission_window = window;
        self
    }

    /// Set the conflict retry policy.
    #[must_use]
    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    /// Set the sweep interval, raised to at least [`MIN_SWEEP_INTERVAL`].
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }
}
