//! Axum HTTP surface for the waitlist admission engine.
//!
//! # Request Flow
//!
//! 1. **Correlation** middleware tags the request and opens an `http_request` span
//! 2. **Extract** the actor (`X-User-Id`), path ids and body
//! 3. **Call** the [`WaitlistEngine`](waitlist_runtime::WaitlistEngine)
//! 4. **Map** the result, or the [`WaitlistError`](waitlist_core::WaitlistError)
//!    through [`AppError`], to an HTTP response
//!
//! # Example
//!
//! ```ignore
//! use waitlist_web::{AppState, router};
//!
//! let app = router(AppState::new(engine));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use extractors::{ActorId, CorrelationId, USER_ID_HEADER};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// The full HTTP surface: waitlist commands, registry hook, admin sweep and
/// health endpoints.
pub fn router(state: AppState) -> Router {
    use handlers::waitlist;

    Router::new()
        .route(
            "/api/events/:event_id/waitlist",
            post(waitlist::join).get(waitlist::list),
        )
        .route(
            "/api/events/:event_id/waitlist/me",
            axum::routing::delete(waitlist::leave),
        )
        .route(
            "/api/events/:event_id/waitlist/me/position",
            get(waitlist::position),
        )
        .route(
            "/api/events/:event_id/waitlist/me/respond",
            post(waitlist::respond),
        )
        .route(
            "/api/events/:event_id/waitlist/:user_id/approve",
            post(waitlist::approve),
        )
        .route(
            "/api/events/:event_id/waitlist/:user_id/reject",
            post(waitlist::reject),
        )
        .route(
            "/api/events/:event_id/participants/canceled",
            post(waitlist::participant_canceled),
        )
        .route("/api/admin/waitlist/sweep", post(waitlist::sweep))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}
