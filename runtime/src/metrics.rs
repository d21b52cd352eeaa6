//! Prometheus metrics for the admission engine.
//!
//! Counters cover every state transition the engine performs plus the
//! failure modes operators need to watch (version conflicts, capacity
//! inconsistencies, notification delivery failures).
//!
//! # Example
//!
//! ```rust,no_run
//! use waitlist_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let exposition = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its exposition is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the exposition endpoint binds to
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the exposition endpoint should bind to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g. by another test) is not an
    /// error; the existing one keeps recording.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("waitlist_joins_total", "Entries created by join");
    describe_counter!(
        "waitlist_promotions_total",
        "Entries promoted from waiting to notified"
    );
    describe_counter!(
        "waitlist_responses_total",
        "Invitation responses, labelled by decision"
    );
    describe_counter!(
        "waitlist_expirations_total",
        "Invitations expired after their deadline"
    );
    describe_counter!("waitlist_removals_total", "Entries removed by leave");
    describe_counter!(
        "waitlist_admin_actions_total",
        "Admin overrides, labelled by action"
    );
    describe_counter!(
        "waitlist_conflicts_total",
        "Transitions abandoned after exhausting conflict retries"
    );
    describe_counter!(
        "waitlist_capacity_inconsistent_total",
        "Promotions or admissions refused because the event had no free slot"
    );
    describe_counter!(
        "waitlist_notification_failures_total",
        "Notification deliveries that failed"
    );
    describe_histogram!(
        "waitlist_sweep_duration_seconds",
        "Time taken by one maintenance sweep"
    );
}

/// Metric recorders for engine transitions.
pub struct WaitlistMetrics;

impl WaitlistMetrics {
    /// Record a join.
    pub fn record_join() {
        counter!("waitlist_joins_total").increment(1);
    }

    /// Record promotions.
    pub fn record_promotions(count: usize) {
        counter!("waitlist_promotions_total").increment(count as u64);
    }

    /// Record an invitation response.
    pub fn record_response(decision: &'static str) {
        counter!("waitlist_responses_total", "decision" => decision).increment(1);
    }

    /// Record an expiry.
    pub fn record_expiration() {
        counter!("waitlist_expirations_total").increment(1);
    }

    /// Record a voluntary leave.
    pub fn record_removal() {
        counter!("waitlist_removals_total").increment(1);
    }

    /// Record an admin override.
    pub fn record_admin_action(action: &'static str) {
        counter!("waitlist_admin_actions_total", "action" => action).increment(1);
    }

    /// Record a transition given up after its conflict retries.
    pub fn record_conflict() {
        counter!("waitlist_conflicts_total").increment(1);
    }

    /// Record a refused promotion or admission.
    pub fn record_capacity_inconsistent() {
        counter!("waitlist_capacity_inconsistent_total").increment(1);
    }

    /// Record a failed notification delivery.
    pub fn record_notification_failure() {
        counter!("waitlist_notification_failures_total").increment(1);
    }

    /// Record one maintenance sweep.
    pub fn record_sweep(duration: Duration) {
        histogram!("waitlist_sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn records_engine_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        WaitlistMetrics::record_join();
        WaitlistMetrics::record_promotions(2);
        WaitlistMetrics::record_response("accept");
        WaitlistMetrics::record_sweep(Duration::from_millis(3));

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("waitlist_joins_total"));
            assert!(rendered.contains("waitlist_promotions_total"));
            assert!(rendered.contains("decision=\"accept\""));
        }
    }
}
