//! Background expiry sweep.
//!
//! [`ExpirySweeper`] runs [`WaitlistEngine::run_maintenance`] on a fixed
//! interval until a shutdown signal arrives. One cycle at a time; a failed
//! cycle is logged and the next tick simply tries again.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, _) = broadcast::channel(1);
//! let sweeper = ExpirySweeper::new(engine.clone(), shutdown_tx.subscribe());
//! let health = sweeper.health();
//! let handle = sweeper.spawn();
//!
//! // Later
//! let _ = shutdown_tx.send(());
//! handle.await?;
//! ```

use crate::config::MIN_SWEEP_INTERVAL;
use crate::engine::WaitlistEngine;
use crate::health::HealthCheck;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Health of the background sweep, shared with the readiness endpoint.
#[derive(Debug, Default)]
pub struct SweeperHealth {
    cycles: AtomicU64,
    failures: AtomicU64,
    last_failed: AtomicBool,
    /// Unix millis of the last finished cycle, 0 before the first one.
    last_run_millis: AtomicI64,
}

impl SweeperHealth {
    fn record(&self, succeeded: bool, at: DateTime<Utc>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_failed.store(!succeeded, Ordering::Relaxed);
        self.last_run_millis.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Finished cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Failed cycles.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Degraded while the most recent cycle failed.
    #[must_use]
    pub fn check(&self) -> HealthCheck {
        let mut check = if self.last_failed.load(Ordering::Relaxed) {
            HealthCheck::degraded("sweeper", "last maintenance cycle failed")
        } else {
            HealthCheck::healthy("sweeper")
        };

        check = check
            .with_metadata("cycles", self.cycles().to_string())
            .with_metadata("failures", self.failures().to_string());
        let last_run = self.last_run_millis.load(Ordering::Relaxed);
        if let Some(at) = DateTime::<Utc>::from_timestamp_millis(last_run).filter(|_| last_run > 0) {
            check = check.with_metadata("last_run", at.to_rfc3339());
        }
        check
    }
}

/// Periodic maintenance task.
pub struct ExpirySweeper {
    engine: WaitlistEngine,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
    health: Arc<SweeperHealth>,
}

impl ExpirySweeper {
    /// Create a sweeper using the engine's configured interval.
    #[must_use]
    pub fn new(engine: WaitlistEngine, shutdown: broadcast::Receiver<()>) -> Self {
        // The config fields are public; apply the floor again.
        let interval = engine.config().sweep_interval.max(MIN_SWEEP_INTERVAL);
        Self {
            engine,
            interval,
            shutdown,
            health: Arc::new(SweeperHealth::default()),
        }
    }

    /// Shared health handle.
    #[must_use]
    pub fn health(&self) -> Arc<SweeperHealth> {
        Arc::clone(&self.health)
    }

    /// Spawn the sweep loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Expiry sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    async fn cycle(&self) {
        let result = self.engine.run_maintenance().await;
        let now = self.engine.environment().clock.now();
        match result {
            Ok(_) => self.health.record(true, now),
            Err(e) => {
                error!(error = %e, "Maintenance cycle failed");
                self.health.record(false, now);
            },
        }
    }
}
