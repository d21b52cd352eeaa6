//! # Waitlist Runtime
//!
//! The admission engine for capacity-limited events.
//!
//! ## Core Components
//!
//! - **[`WaitlistEngine`]**: the command surface (join, leave, respond,
//!   admin overrides, registry callbacks, maintenance)
//! - **[`AdmissionController`]**: promotes queued users into freed slots
//! - **[`InvitationScheduler`]**: response windows, lazy and swept expiry
//! - **[`ExpirySweeper`]**: the periodic background sweep
//!
//! All mutations of one event run under that event's lock; different events
//! never contend. Every entry change is additionally a compare-and-swap on
//! `(status, version)` in the store, so concurrent engine instances over a
//! shared database cannot both win a race.
//!
//! ## Example
//!
//! ```ignore
//! use waitlist_runtime::{EngineConfig, WaitlistEngine, WaitlistEnvironment};
//!
//! let engine = WaitlistEngine::new(environment, EngineConfig::default());
//! engine.join(event_id, user_id).await?;
//! engine.on_participant_canceled(event_id).await?;
//! ```

use std::sync::Arc;
use waitlist_core::environment::{AccessPolicy, CapacityTracker, Clock, NotificationGateway};
use waitlist_core::WaitlistStore;

pub mod admission;
pub mod config;
pub mod engine;
pub mod health;
pub mod locks;
pub mod metrics;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod sweeper;

pub use admission::{AdmissionController, PromotionReport};
pub use config::EngineConfig;
pub use engine::WaitlistEngine;
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use scheduler::{InvitationScheduler, SweepReport};
pub use sweeper::{ExpirySweeper, SweeperHealth};

/// External collaborators of the engine.
#[derive(Clone)]
pub struct WaitlistEnvironment {
    /// Entry persistence
    pub store: Arc<dyn WaitlistStore>,
    /// Event registry capacity bookkeeping
    pub tracker: Arc<dyn CapacityTracker>,
    /// Invitation and decision delivery
    pub notifications: Arc<dyn NotificationGateway>,
    /// Admin capability queries
    pub access: Arc<dyn AccessPolicy>,
    /// Wall-clock time
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WaitlistEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitlistEnvironment").finish_non_exhaustive()
    }
}
