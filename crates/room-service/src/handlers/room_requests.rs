//! Room request handlers.
//!
//! - `POST /api/v1/room-requests` - Submit a request (201)
//! - `GET /api/v1/room-requests` - List requests in the caller's scope
//! - `POST /api/v1/room-requests/:id/approve` - Approve, materializing the room
//! - `POST /api/v1/room-requests/:id/reject` - Reject

use super::{parse_json, parse_optional_json};
use crate::errors::RoomError;
use crate::models::{Actor, ApproveRequestResponse, ListRequestsQuery, RoomRequestResponse};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for POST /api/v1/room-requests
///
/// # Response
///
/// - 201 Created: Pending request
/// - 403 Forbidden (`CAN_CREATE_DIRECTLY`): Caller should create the room instead
/// - 409 Conflict (`TOO_MANY_PENDING`): Pending request limit reached
#[instrument(skip_all, name = "rooms.handlers.request_room")]
pub async fn request_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    body: Bytes,
) -> Result<(StatusCode, Json<RoomRequestResponse>), RoomError> {
    let request = parse_json(&body)?;
    let created = state.lifecycle.request(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for GET /api/v1/room-requests
///
/// Query: `status` (default `pending`), `mine`.
#[instrument(skip_all, name = "rooms.handlers.list_requests")]
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<RoomRequestResponse>>, RoomError> {
    Ok(Json(state.lifecycle.list_requests(&actor, &query).await?))
}

/// Handler for POST /api/v1/room-requests/:id/approve
///
/// Optional body: `{"note": "..."}`.
///
/// # Response
///
/// - 200 OK: Reviewed request plus the created room
/// - 403 Forbidden: Not a reviewer, or reviewing one's own request
/// - 404 Not Found: Unknown request or outside the caller's scope
/// - 409 Conflict: Already reviewed
/// - 410 Gone: Request expired
#[instrument(skip_all, name = "rooms.handlers.approve_request", fields(request_id = %request_id))]
pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ApproveRequestResponse>, RoomError> {
    let review = parse_optional_json(&body)?;
    Ok(Json(
        state.lifecycle.approve(&actor, request_id, review).await?,
    ))
}

/// Handler for POST /api/v1/room-requests/:id/reject
#[instrument(skip_all, name = "rooms.handlers.reject_request", fields(request_id = %request_id))]
pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<RoomRequestResponse>, RoomError> {
    let review = parse_optional_json(&body)?;
    Ok(Json(
        state.lifecycle.reject(&actor, request_id, review).await?,
    ))
}
