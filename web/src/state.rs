//! Application state for Axum handlers.

use std::sync::Arc;
use waitlist_runtime::{SweeperHealth, WaitlistEngine};

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The admission engine
    pub engine: WaitlistEngine,
    /// Health of the background sweeper, when one runs in this process
    pub sweeper: Option<Arc<SweeperHealth>>,
}

impl AppState {
    /// State without a background sweeper.
    #[must_use]
    pub const fn new(engine: WaitlistEngine) -> Self {
        Self {
            engine,
            sweeper: None,
        }
    }

    /// Report the sweeper's health on the readiness endpoint.
    #[must_use]
    pub fn with_sweeper(mut self, health: Arc<SweeperHealth>) -> Self {
        self.sweeper = Some(health);
        self
    }
}
