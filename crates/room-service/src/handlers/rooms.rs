//! Room handlers.
//!
//! - `POST /api/v1/rooms` - Create a room directly (201)
//! - `GET /api/v1/rooms` - List and search visible rooms
//! - `GET /api/v1/rooms/:code` - Get a room
//! - `POST /api/v1/rooms/:code/join` - Join
//! - `POST /api/v1/rooms/:code/leave` - Leave (204)
//! - `POST /api/v1/rooms/:code/start|end|cancel` - Manager transitions
//! - `GET /api/v1/rooms/:code/participants` - Active roster
//! - `POST /api/v1/rooms/:code/participants/:user_id/kick` - Kick
//! - `PATCH /api/v1/rooms/:code/me/media` - Own device toggles
//! - `POST /api/v1/rooms/:code/invites` - Issue invite (201)
//! - `DELETE /api/v1/rooms/:code/invites/:invite_id` - Revoke invite (204)
//!
//! # Security
//!
//! - Every route requires a resolved [`Actor`] (see `middleware::auth`)
//! - Rooms the caller cannot see are reported as not found
//! - Raw invite tokens appear only in the response that created them

use super::{parse_json, parse_optional_json};
use crate::errors::RoomError;
use crate::models::{
    Actor, CreateRoomResponse, InviteResponse, JoinRoomResponse, ListRoomsQuery,
    ParticipantResponse, RoomResponse,
};
use crate::routes::AppState;
use crate::services::meet_code::normalize_meet_code;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Canonical form of a path code. Codes that cannot exist are not found.
fn room_code(raw: &str) -> Result<String, RoomError> {
    normalize_meet_code(raw).ok_or_else(|| RoomError::NotFound("Room not found".to_string()))
}

/// Handler for POST /api/v1/rooms
///
/// # Response
///
/// - 201 Created: Room, join URL, and for private rooms a one-time invite
/// - 400 Bad Request: Invalid body
/// - 403 Forbidden: Caller must submit a room request instead
#[instrument(skip_all, name = "rooms.handlers.create_room")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateRoomResponse>), RoomError> {
    let request = parse_json(&body)?;
    let created = state.lifecycle.create(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for GET /api/v1/rooms
///
/// Query: `q` (name search), `state`, `include_closed`, `limit` (1-100).
#[instrument(skip_all, name = "rooms.handlers.list_rooms")]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<Vec<RoomResponse>>, RoomError> {
    let rooms = state.lifecycle.list_rooms(&actor, &query).await?;
    Ok(Json(rooms))
}

/// Handler for GET /api/v1/rooms/:code
#[instrument(skip_all, name = "rooms.handlers.get_room", fields(meet_code = %code))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<Json<RoomResponse>, RoomError> {
    let code = room_code(&code)?;
    Ok(Json(state.lifecycle.get_room(&actor, &code).await?))
}

/// Handler for POST /api/v1/rooms/:code/join
///
/// Optional body: `{"invite_token": "...", "password": "..."}`.
///
/// # Response
///
/// - 200 OK: Room, role and call URL
/// - 403 Forbidden: Missing or wrong credentials, or removed from the room
/// - 404 Not Found: Room missing or not visible
/// - 409 Conflict: Room full, not started, ended or canceled
#[instrument(skip_all, name = "rooms.handlers.join_room", fields(meet_code = %code))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<JoinRoomResponse>, RoomError> {
    let code = room_code(&code)?;
    let request = parse_optional_json(&body)?;
    Ok(Json(state.lifecycle.join(&actor, &code, request).await?))
}

/// Handler for POST /api/v1/rooms/:code/leave
#[instrument(skip_all, name = "rooms.handlers.leave_room", fields(meet_code = %code))]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<StatusCode, RoomError> {
    let code = room_code(&code)?;
    state.lifecycle.leave(&actor, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/rooms/:code/start
#[instrument(skip_all, name = "rooms.handlers.start_room", fields(meet_code = %code))]
pub async fn start_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<Json<RoomResponse>, RoomError> {
    let code = room_code(&code)?;
    Ok(Json(state.lifecycle.start(&actor, &code).await?))
}

/// Handler for POST /api/v1/rooms/:code/end
#[instrument(skip_all, name = "rooms.handlers.end_room", fields(meet_code = %code))]
pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<Json<RoomResponse>, RoomError> {
    let code = room_code(&code)?;
    Ok(Json(state.lifecycle.end(&actor, &code).await?))
}

/// Handler for POST /api/v1/rooms/:code/cancel
#[instrument(skip_all, name = "rooms.handlers.cancel_room", fields(meet_code = %code))]
pub async fn cancel_room(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<Json<RoomResponse>, RoomError> {
    let code = room_code(&code)?;
    Ok(Json(state.lifecycle.cancel(&actor, &code).await?))
}

/// Handler for GET /api/v1/rooms/:code/participants
#[instrument(skip_all, name = "rooms.handlers.list_participants", fields(meet_code = %code))]
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<Json<Vec<ParticipantResponse>>, RoomError> {
    let code = room_code(&code)?;
    Ok(Json(state.lifecycle.list_participants(&actor, &code).await?))
}

/// Handler for POST /api/v1/rooms/:code/participants/:user_id/kick
#[instrument(skip_all, name = "rooms.handlers.kick_participant", fields(meet_code = %code, target = %user_id))]
pub async fn kick_participant(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((code, user_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, RoomError> {
    let code = room_code(&code)?;
    state.lifecycle.kick(&actor, &code, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for PATCH /api/v1/rooms/:code/me/media
///
/// Body: any of `mic_on`, `video_on`, `screen_on`.
#[instrument(skip_all, name = "rooms.handlers.update_media", fields(meet_code = %code))]
pub async fn update_media(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<ParticipantResponse>, RoomError> {
    let code = room_code(&code)?;
    let request = parse_json(&body)?;
    Ok(Json(
        state.lifecycle.update_media(&actor, &code, request).await?,
    ))
}

/// Handler for POST /api/v1/rooms/:code/invites
#[instrument(skip_all, name = "rooms.handlers.issue_invite", fields(meet_code = %code))]
pub async fn issue_invite(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(code): Path<String>,
) -> Result<(StatusCode, Json<InviteResponse>), RoomError> {
    let code = room_code(&code)?;
    let invite = state.lifecycle.issue_invite(&actor, &code).await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

/// Handler for DELETE /api/v1/rooms/:code/invites/:invite_id
#[instrument(skip_all, name = "rooms.handlers.revoke_invite", fields(meet_code = %code, invite_id = %invite_id))]
pub async fn revoke_invite(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((code, invite_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, RoomError> {
    let code = room_code(&code)?;
    state.lifecycle.revoke_invite(&actor, &code, invite_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_code_normalizes_case() {
        assert_eq!(room_code("k7qw2mzp").unwrap(), "K7QW2MZP");
    }

    #[test]
    fn test_room_code_rejects_impossible_codes() {
        for raw in ["", "SHORT", "K7QW2MZ0", "K7QW2MZPX", "K7QW-2MZ"] {
            assert!(
                matches!(room_code(raw), Err(RoomError::NotFound(_))),
                "{raw:?} should be not found"
            );
        }
    }
}
