//! Error types for web handlers.
//!
//! Bridges [`WaitlistError`] to HTTP responses through Axum's `IntoResponse`.
//! Every error body has the same shape:
//!
//! ```json
//! { "code": "CONFLICT", "message": "..." }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use waitlist_core::{ErrorKind, WaitlistError};

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<WaitlistEntry>, AppError> {
///     let entry = state.engine.join(event_id, user_id).await?;
///     Ok(Json(entry))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

/// HTTP status for each engine error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::CapacityInconsistent => StatusCode::CONFLICT,
        ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<WaitlistError> for AppError {
    fn from(err: WaitlistError) -> Self {
        let kind = err.kind();
        Self::new(status_for(kind), err.to_string(), kind.as_str())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request failed"
            );
        } else if self.code == ErrorKind::CapacityInconsistent.as_str() {
            tracing::error!(message = %self.message, "Capacity inconsistency surfaced to client");
        } else {
            tracing::debug!(status = %self.status, code = self.code, "Request rejected");
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waitlist_core::{EventId, UserId};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn engine_kinds_map_to_statuses() {
        let cases = [
            (WaitlistError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (WaitlistError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                WaitlistError::InvalidState("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_STATE",
            ),
            (
                WaitlistError::Forbidden {
                    actor: UserId::new(),
                    event_id: EventId::new(),
                },
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                WaitlistError::CapacityInconsistent {
                    event_id: EventId::new(),
                    capacity: 1,
                    confirmed: 1,
                    outstanding: 0,
                },
                StatusCode::CONFLICT,
                "CAPACITY_INCONSISTENT",
            ),
            (
                WaitlistError::Unavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
            ),
        ];

        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }
}
