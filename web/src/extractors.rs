//! Request extractors.
//!
//! - [`ActorId`]: the acting user, from the `X-User-Id` header
//! - [`CorrelationId`]: the request's correlation id
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the gateway has put the verified user id in `X-User-Id`.

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;
use waitlist_core::UserId;

/// Header carrying the acting user.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The user on whose behalf the request is made.
///
/// # Example
///
/// ```ignore
/// async fn join(State(state): State<AppState>, actor: ActorId, ...) { ... }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorId(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::bad_request(format!("Missing {USER_ID_HEADER} header")))?;

        raw.to_str()
            .ok()
            .and_then(|s| s.parse::<UserId>().ok())
            .map(Self)
            .ok_or_else(|| AppError::bad_request(format!("Malformed {USER_ID_HEADER} header")))
    }
}

/// Correlation ID for request tracing.
///
/// Taken from the request extensions when the correlation middleware ran,
/// otherwise from the `X-Correlation-ID` header, otherwise freshly generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}
