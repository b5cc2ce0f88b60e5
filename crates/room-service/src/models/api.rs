//! Request and response bodies of the rooms API.

use super::{
    validate_room_name, ParticipantRole, ParticipantRow, RequestStatus, RoomDraft, RoomRequestRow,
    RoomRow, RoomState, Visibility, DEFAULT_MAX_PARTICIPANTS, MAX_DECISION_NOTE_LENGTH,
    MAX_PARTICIPANTS, MAX_PASSWORD_LENGTH, MIN_PARTICIPANTS, MIN_PASSWORD_LENGTH,
    SCHEDULE_SKEW_SECONDS,
};
use crate::errors::RoomError;
use chrono::{DateTime, Duration, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Readiness check response.
///
/// Returned by the `/ready` endpoint (readiness probe).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,

    /// Error message (generic, no infrastructure details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /api/v1/rooms` and `POST /api/v1/room-requests`.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,

    pub visibility: Visibility,

    /// Required for course-exclusive rooms; optional scope for private ones.
    #[serde(default)]
    pub community_id: Option<Uuid>,

    #[serde(default)]
    pub max_participants: Option<i32>,

    #[serde(default)]
    pub allow_mic: Option<bool>,

    #[serde(default)]
    pub allow_video: Option<bool>,

    #[serde(default)]
    pub allow_screen_share: Option<bool>,

    /// Private rooms only.
    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CreateRoomRequest {
    /// Validate the body against the room rules as of `now`.
    pub fn validate(self, now: DateTime<Utc>) -> Result<RoomDraft, RoomError> {
        let name = validate_room_name(&self.name)?;

        let max_participants = self.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&max_participants) {
            return Err(RoomError::Validation(format!(
                "max_participants must be between {MIN_PARTICIPANTS} and {MAX_PARTICIPANTS}"
            )));
        }

        match (self.visibility, self.community_id) {
            (Visibility::CourseExclusive, None) => {
                return Err(RoomError::Validation(
                    "Course-exclusive rooms require a community_id".to_string(),
                ));
            }
            (Visibility::Public, Some(_)) => {
                return Err(RoomError::Validation(
                    "Public rooms cannot be scoped to a community".to_string(),
                ));
            }
            _ => {}
        }

        // An empty password field means "no password"
        let password = self
            .password
            .filter(|p| !p.expose_secret().is_empty());
        if let Some(password) = &password {
            if self.visibility != Visibility::Private {
                return Err(RoomError::Validation(
                    "Only private rooms can have a password".to_string(),
                ));
            }
            let len = password.expose_secret().chars().count();
            if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len) {
                return Err(RoomError::Validation(format!(
                    "Password must be between {MIN_PASSWORD_LENGTH} and {MAX_PASSWORD_LENGTH} characters"
                )));
            }
        }

        if let Some(at) = self.scheduled_at {
            if at < now - Duration::seconds(SCHEDULE_SKEW_SECONDS) {
                return Err(RoomError::Validation(
                    "scheduled_at cannot be in the past".to_string(),
                ));
            }
        }

        Ok(RoomDraft {
            name,
            visibility: self.visibility,
            community_id: self.community_id,
            max_participants,
            allow_mic: self.allow_mic.unwrap_or(true),
            allow_video: self.allow_video.unwrap_or(true),
            allow_screen_share: self.allow_screen_share.unwrap_or(true),
            password,
            scheduled_at: self.scheduled_at,
        })
    }
}

/// Body of `POST /api/v1/rooms/:code/join`. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub invite_token: Option<SecretString>,

    #[serde(default)]
    pub password: Option<SecretString>,
}

/// Body of approve/reject.
#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequestBody {
    #[serde(default)]
    pub note: Option<String>,
}

impl ReviewRequestBody {
    /// Trimmed note, `None` when blank.
    pub fn validated_note(&self) -> Result<Option<String>, RoomError> {
        let Some(note) = self.note.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if note.is_empty() {
            return Ok(None);
        }
        if note.chars().count() > MAX_DECISION_NOTE_LENGTH {
            return Err(RoomError::Validation(format!(
                "Decision note must be at most {MAX_DECISION_NOTE_LENGTH} characters"
            )));
        }
        Ok(Some(note.to_string()))
    }
}

/// Body of `PATCH /api/v1/rooms/:code/me/media`. Absent fields are unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct MediaStateRequest {
    #[serde(default)]
    pub mic_on: Option<bool>,

    #[serde(default)]
    pub video_on: Option<bool>,

    #[serde(default)]
    pub screen_on: Option<bool>,
}

/// Query of `GET /api/v1/rooms`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListRoomsQuery {
    /// Case-insensitive name search.
    #[serde(default)]
    pub q: Option<String>,

    #[serde(default)]
    pub state: Option<RoomState>,

    /// Include ended and canceled rooms. Implied by an explicit `state`.
    #[serde(default)]
    pub include_closed: Option<bool>,

    #[serde(default)]
    pub limit: Option<i64>,
}

/// Default page size of room listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Largest page size of room listings.
pub const MAX_LIST_LIMIT: i64 = 100;

impl ListRoomsQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    /// Trimmed search text, `None` when blank.
    pub fn search(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

/// Query of `GET /api/v1/room-requests`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListRequestsQuery {
    /// Defaults to pending.
    #[serde(default)]
    pub status: Option<RequestStatus>,

    /// Only the caller's own requests.
    #[serde(default)]
    pub mine: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomFeatures {
    pub mic: bool,
    pub video: bool,
    pub screen_share: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Room as returned to a specific caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub visibility: Visibility,
    pub state: RoomState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<Uuid>,
    pub max_participants: i32,
    pub features: RoomFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub has_password: bool,
    pub creator: UserSummary,
    pub active_participants: i64,
    pub can_manage: bool,
}

impl RoomResponse {
    pub fn from_row(row: &RoomRow, can_manage: bool) -> Self {
        Self {
            id: row.room_id,
            code: row.meet_code.clone(),
            name: row.name.clone(),
            visibility: row.visibility,
            state: row.state,
            community_id: row.community_id,
            max_participants: row.max_participants,
            features: RoomFeatures {
                mic: row.allow_mic,
                video: row.allow_video,
                screen_share: row.allow_screen_share,
            },
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            has_password: row.password_hash.is_some(),
            creator: UserSummary {
                user_id: row.created_by,
                display_name: row.creator_display_name.clone(),
            },
            active_participants: row.active_participants,
            can_manage,
        }
    }
}

/// Returned when a room is materialized (direct create or approval).
///
/// `invite_token` is the only time the raw token is ever shown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room: RoomResponse,
    pub join_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequestResponse {
    pub id: Uuid,
    pub name: String,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<Uuid>,
    pub max_participants: i32,
    pub features: RoomFeatures,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub expires_at: DateTime<Utc>,
    pub requested_by: UserSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&RoomRequestRow> for RoomRequestResponse {
    fn from(row: &RoomRequestRow) -> Self {
        Self {
            id: row.request_id,
            name: row.name.clone(),
            visibility: row.visibility,
            community_id: row.community_id,
            max_participants: row.max_participants,
            features: RoomFeatures {
                mic: row.allow_mic,
                video: row.allow_video,
                screen_share: row.allow_screen_share,
            },
            has_password: row.password_hash.is_some(),
            scheduled_at: row.scheduled_at,
            status: row.status,
            expires_at: row.expires_at,
            requested_by: UserSummary {
                user_id: row.requested_by,
                display_name: row.requester_display_name.clone(),
            },
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            decision_note: row.decision_note.clone(),
            approved_room_id: row.approved_room_id,
            created_at: row.created_at,
        }
    }
}

/// Result of a successful approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequestResponse {
    pub request: RoomRequestResponse,
    #[serde(flatten)]
    pub created: CreateRoomResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub room: RoomResponse,
    pub role: ParticipantRole,
    pub call_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub role: ParticipantRole,
    pub mic_on: bool,
    pub video_on: bool,
    pub screen_on: bool,
    pub joined_at: DateTime<Utc>,
}

impl From<&ParticipantRow> for ParticipantResponse {
    fn from(row: &ParticipantRow) -> Self {
        Self {
            user_id: row.user_id,
            display_name: row.display_name.clone(),
            role: row.role,
            mic_on: row.mic_on,
            video_on: row.video_on,
            screen_on: row.screen_on,
            joined_at: row.joined_at,
        }
    }
}

/// Returned once when an invite is issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteResponse {
    pub invite_id: Uuid,
    pub token: String,
    pub invite_url: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> CreateRoomRequest {
        serde_json::from_value(json).expect("body should deserialize")
    }

    #[test]
    fn test_validate_applies_defaults() {
        let draft = body(serde_json::json!({"name": " Study Hall ", "visibility": "public"}))
            .validate(Utc::now())
            .unwrap();

        assert_eq!(draft.name, "Study Hall");
        assert_eq!(draft.max_participants, DEFAULT_MAX_PARTICIPANTS);
        assert!(draft.allow_mic && draft.allow_video && draft.allow_screen_share);
        assert!(draft.password.is_none());
    }

    #[test]
    fn test_validate_rejects_capacity_out_of_range() {
        for capacity in [1, 100, -5] {
            let result = body(serde_json::json!({
                "name": "Study Hall",
                "visibility": "public",
                "max_participants": capacity,
            }))
            .validate(Utc::now());
            assert!(matches!(result, Err(RoomError::Validation(_))), "{capacity}");
        }
    }

    #[test]
    fn test_validate_rejects_password_on_public_room() {
        let result = body(serde_json::json!({
            "name": "Study Hall",
            "visibility": "public",
            "password": "secret",
        }))
        .validate(Utc::now());
        assert!(matches!(result, Err(RoomError::Validation(_))));
    }

    #[test]
    fn test_validate_password_length_on_private_room() {
        let short = body(serde_json::json!({
            "name": "Study Hall",
            "visibility": "private",
            "password": "abc",
        }))
        .validate(Utc::now());
        assert!(matches!(short, Err(RoomError::Validation(_))));

        let ok = body(serde_json::json!({
            "name": "Study Hall",
            "visibility": "private",
            "password": "abcd",
        }))
        .validate(Utc::now())
        .unwrap();
        assert!(ok.password.is_some());
    }

    #[test]
    fn test_validate_empty_password_means_none() {
        let draft = body(serde_json::json!({
            "name": "Study Hall",
            "visibility": "public",
            "password": "",
        }))
        .validate(Utc::now())
        .unwrap();
        assert!(draft.password.is_none());
    }

    #[test]
    fn test_validate_course_exclusive_requires_community() {
        let result = body(serde_json::json!({
            "name": "Lab Section",
            "visibility": "course_exclusive",
        }))
        .validate(Utc::now());
        assert!(matches!(result, Err(RoomError::Validation(_))));
    }

    #[test]
    fn test_validate_public_rejects_community() {
        let result = body(serde_json::json!({
            "name": "Lab Section",
            "visibility": "public",
            "community_id": Uuid::new_v4(),
        }))
        .validate(Utc::now());
        assert!(matches!(result, Err(RoomError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_past_schedule() {
        let now = Utc::now();
        let result = body(serde_json::json!({
            "name": "Study Hall",
            "visibility": "public",
            "scheduled_at": now - Duration::minutes(5),
        }))
        .validate(now);
        assert!(matches!(result, Err(RoomError::Validation(_))));

        // Within the skew window is accepted
        let draft = body(serde_json::json!({
            "name": "Study Hall",
            "visibility": "public",
            "scheduled_at": now - Duration::seconds(30),
        }))
        .validate(now);
        assert!(draft.is_ok());
    }

    #[test]
    fn test_review_note_validation() {
        let blank = ReviewRequestBody {
            note: Some("   ".to_string()),
        };
        assert_eq!(blank.validated_note().unwrap(), None);

        let long = ReviewRequestBody {
            note: Some("n".repeat(MAX_DECISION_NOTE_LENGTH + 1)),
        };
        assert!(long.validated_note().is_err());

        let ok = ReviewRequestBody {
            note: Some(" looks good ".to_string()),
        };
        assert_eq!(ok.validated_note().unwrap().as_deref(), Some("looks good"));
    }

    #[test]
    fn test_list_limit_is_clamped() {
        let mut query = ListRoomsQuery::default();
        assert_eq!(query.effective_limit(), DEFAULT_LIST_LIMIT);
        query.limit = Some(1_000);
        assert_eq!(query.effective_limit(), MAX_LIST_LIMIT);
        query.limit = Some(0);
        assert_eq!(query.effective_limit(), 1);
    }

    #[test]
    fn test_room_response_never_exposes_hash() {
        let now = Utc::now();
        let row = RoomRow {
            room_id: Uuid::new_v4(),
            meet_code: "K7QW2MZP".to_string(),
            name: "Study Hall".to_string(),
            created_by: Uuid::new_v4(),
            creator_display_name: Some("Ada".to_string()),
            visibility: Visibility::Private,
            community_id: None,
            max_participants: 10,
            allow_mic: true,
            allow_video: false,
            allow_screen_share: true,
            password_hash: Some("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string()),
            state: RoomState::Live,
            scheduled_at: None,
            started_at: Some(now),
            ended_at: None,
            source_request_id: None,
            active_participants: 2,
            created_at: now,
            updated_at: now,
        };

        let response = RoomResponse::from_row(&row, false);
        let json = serde_json::to_string(&response).unwrap();

        assert!(response.has_password);
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"active_participants\":2"));
        assert!(json.contains("\"can_manage\":false"));
    }
}
