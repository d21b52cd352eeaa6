//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether the service is
//! alive and whether it should receive traffic.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use waitlist_core::{EventId, WaitlistStatus};
use waitlist_runtime::{HealthCheck, HealthReport};

/// Liveness: the process is up. Does not touch dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: the store answers queries and the sweeper is not failing hard.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let mut checks = vec![probe_store(&state).await];
    if let Some(sweeper) = &state.sweeper {
        checks.push(sweeper.check());
    }

    let report = HealthReport::new(checks);
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}

async fn probe_store(state: &AppState) -> HealthCheck {
    // Any indexed query will do; the nil event never has entries.
    let probe = state
        .engine
        .environment()
        .store
        .count_by_status(EventId::from_uuid(uuid::Uuid::nil()), WaitlistStatus::Waiting)
        .await;

    match probe {
        Ok(_) => HealthCheck::healthy("store"),
        Err(err) => {
            tracing::warn!(error = %err, "Store readiness probe failed");
            HealthCheck::unhealthy("store", err.to_string())
        },
    }
}
