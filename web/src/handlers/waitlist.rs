//! Waitlist command handlers.
//!
//! Thin adapters: parse the request, call the engine, map the result. All
//! business rules live in [`WaitlistEngine`](waitlist_runtime::WaitlistEngine).

use crate::error::AppError;
use crate::extractors::{ActorId, CorrelationId};
use crate::state::AppState;
use crate::WebResult;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waitlist_core::environment::Clock;
use waitlist_core::{Decision, EventId, UserId, WaitlistEntry, WaitlistStatus};
use waitlist_runtime::{PromotionReport, SweepReport};

/// Query string of the list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Optional status filter, e.g. `waiting`
    pub status: Option<String>,
}

/// Body of the respond endpoint.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    /// `accept` or `decline`
    pub decision: Decision,
}

/// Body of the position endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionResponse {
    /// 1-based rank among waiting entries
    pub position: usize,
}

/// `POST /api/events/:event_id/waitlist`
///
/// # Errors
///
/// `404` for an unknown event, `409` when the caller is already queued.
pub async fn join(
    State(state): State<AppState>,
    ActorId(user_id): ActorId,
    CorrelationId(correlation_id): CorrelationId,
    Path(event_id): Path<Uuid>,
) -> WebResult<(StatusCode, Json<WaitlistEntry>)> {
    let event_id = EventId::from_uuid(event_id);
    tracing::debug!(%correlation_id, %event_id, %user_id, "Join requested");

    let entry = state.engine.join(event_id, user_id).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `DELETE /api/events/:event_id/waitlist/me`
///
/// # Errors
///
/// `404` when the caller has no active entry.
pub async fn leave(
    State(state): State<AppState>,
    ActorId(user_id): ActorId,
    Path(event_id): Path<Uuid>,
) -> WebResult<StatusCode> {
    state
        .engine
        .leave(EventId::from_uuid(event_id), user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/events/:event_id/waitlist?status=waiting`
///
/// # Errors
///
/// `400` for an unknown status filter.
pub async fn list(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> WebResult<Json<Vec<WaitlistEntry>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<WaitlistStatus>)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let entries = state
        .engine
        .list_waitlist(EventId::from_uuid(event_id), status)
        .await?;
    Ok(Json(entries))
}

/// `GET /api/events/:event_id/waitlist/me/position`
///
/// # Errors
///
/// `404` when the caller is not waiting.
pub async fn position(
    State(state): State<AppState>,
    ActorId(user_id): ActorId,
    Path(event_id): Path<Uuid>,
) -> WebResult<Json<PositionResponse>> {
    let position = state
        .engine
        .position_of(EventId::from_uuid(event_id), user_id)
        .await?;
    Ok(Json(PositionResponse { position }))
}

/// `POST /api/events/:event_id/waitlist/me/respond`
///
/// # Errors
///
/// `422` when the caller has no live invitation, `404` without an entry.
pub async fn respond(
    State(state): State<AppState>,
    ActorId(user_id): ActorId,
    Path(event_id): Path<Uuid>,
    Json(request): Json<RespondRequest>,
) -> WebResult<Json<WaitlistEntry>> {
    let entry = state
        .engine
        .respond(EventId::from_uuid(event_id), user_id, request.decision)
        .await?;
    Ok(Json(entry))
}

/// `POST /api/events/:event_id/waitlist/:user_id/approve`
///
/// # Errors
///
/// `403` without the capability, `409 CAPACITY_INCONSISTENT` on a full event.
pub async fn approve(
    State(state): State<AppState>,
    ActorId(actor): ActorId,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
) -> WebResult<Json<WaitlistEntry>> {
    let entry = state
        .engine
        .approve(actor, EventId::from_uuid(event_id), UserId::from_uuid(user_id))
        .await?;
    Ok(Json(entry))
}

/// `POST /api/events/:event_id/waitlist/:user_id/reject`
///
/// # Errors
///
/// `403` without the capability, `422` for an already accepted entry.
pub async fn reject(
    State(state): State<AppState>,
    ActorId(actor): ActorId,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
) -> WebResult<Json<WaitlistEntry>> {
    let entry = state
        .engine
        .reject(actor, EventId::from_uuid(event_id), UserId::from_uuid(user_id))
        .await?;
    Ok(Json(entry))
}

/// `POST /api/events/:event_id/participants/canceled`
///
/// Called by the event registry after a confirmed participant canceled.
///
/// # Errors
///
/// `404` for an unknown event, `503` when a backend is down.
pub async fn participant_canceled(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> WebResult<Json<PromotionReport>> {
    let report = state
        .engine
        .on_participant_canceled(EventId::from_uuid(event_id))
        .await?;
    Ok(Json(report))
}

/// `POST /api/admin/waitlist/sweep`
///
/// Expire overdue invitations now instead of waiting for the sweeper.
///
/// # Errors
///
/// `503` when the store cannot be read.
pub async fn sweep(State(state): State<AppState>) -> WebResult<Json<SweepReport>> {
    let now = state.engine.environment().clock.now();
    let report = state.engine.expire_overdue(now).await?;
    Ok(Json(report))
}
