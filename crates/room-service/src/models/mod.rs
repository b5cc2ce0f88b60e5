//! Room service models.
//!
//! Domain enums, database rows and the validated room draft shared by the
//! lifecycle controller, the admission policy and the repositories. Request
//! and response bodies of the HTTP surface live in [`api`].

pub mod api;

pub use api::*;

use crate::errors::RoomError;
use chrono::{DateTime, Duration, Utc};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum room name length (after trimming).
pub const MIN_ROOM_NAME_LENGTH: usize = 3;

/// Maximum room name length (after trimming).
pub const MAX_ROOM_NAME_LENGTH: usize = 100;

/// Smallest allowed room capacity.
pub const MIN_PARTICIPANTS: i32 = 2;

/// Largest allowed room capacity.
pub const MAX_PARTICIPANTS: i32 = 99;

/// Capacity used when the caller does not supply one.
pub const DEFAULT_MAX_PARTICIPANTS: i32 = 10;

/// Minimum room password length.
pub const MIN_PASSWORD_LENGTH: usize = 4;

/// Maximum room password length.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Maximum length of a reviewer's decision note.
pub const MAX_DECISION_NOTE_LENGTH: usize = 500;

/// Tolerance around "now" when classifying `scheduled_at`.
///
/// A schedule further in the past than this is rejected; a schedule further in
/// the future yields a `scheduled` room, anything in between starts live.
pub const SCHEDULE_SKEW_SECONDS: i64 = 60;

/// Who may see and join a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone not mutually blocked with the creator.
    Public,

    /// Members and affiliates of the owning community or course.
    CourseExclusive,

    /// Invite or password gated.
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::CourseExclusive => "course_exclusive",
            Visibility::Private => "private",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "course_exclusive" => Some(Visibility::CourseExclusive),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// Room lifecycle state.
///
/// `scheduled -> live -> ended`, plus `scheduled | live -> canceled`.
/// Ended and canceled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Scheduled,
    Live,
    Ended,
    Canceled,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomState::Scheduled => "scheduled",
            RoomState::Live => "live",
            RoomState::Ended => "ended",
            RoomState::Canceled => "canceled",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(RoomState::Scheduled),
            "live" => Some(RoomState::Live),
            "ended" => Some(RoomState::Ended),
            "canceled" => Some(RoomState::Canceled),
            _ => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RoomState) -> bool {
        matches!(
            (self, next),
            (RoomState::Scheduled, RoomState::Live)
                | (RoomState::Scheduled, RoomState::Canceled)
                | (RoomState::Live, RoomState::Ended)
                | (RoomState::Live, RoomState::Canceled)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, RoomState::Ended | RoomState::Canceled)
    }
}

/// Room request status. Exactly one terminal transition leaves `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            "expired" => Some(RequestStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    CoHost,
    Participant,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::CoHost => "co_host",
            ParticipantRole::Participant => "participant",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "host" => Some(ParticipantRole::Host),
            "co_host" => Some(ParticipantRole::CoHost),
            "participant" => Some(ParticipantRole::Participant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Left,
    Kicked,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Active => "active",
            ParticipantStatus::Left => "left",
            ParticipantStatus::Kicked => "kicked",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ParticipantStatus::Active),
            "left" => Some(ParticipantStatus::Left),
            "kicked" => Some(ParticipantStatus::Kicked),
            _ => None,
        }
    }
}

/// Action tag of a moderation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    CreateRoom,
    RequestRoom,
    ApproveRequest,
    RejectRequest,
    StartRoom,
    EndRoom,
    CancelRoom,
    KickParticipant,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::CreateRoom => "create_room",
            ModerationAction::RequestRoom => "request_room",
            ModerationAction::ApproveRequest => "approve_request",
            ModerationAction::RejectRequest => "reject_request",
            ModerationAction::StartRoom => "start_room",
            ModerationAction::EndRoom => "end_room",
            ModerationAction::CancelRoom => "cancel_room",
            ModerationAction::KickParticipant => "kick_participant",
        }
    }
}

/// Platform-wide role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    Owner,
    Admin,
    Member,
}

impl PlatformRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformRole::Owner => "owner",
            PlatformRole::Admin => "admin",
            PlatformRole::Member => "member",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(PlatformRole::Owner),
            "admin" => Some(PlatformRole::Admin),
            "member" => Some(PlatformRole::Member),
            _ => None,
        }
    }
}

/// Authenticated caller, as resolved by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub display_name: String,
    pub platform_role: PlatformRole,
    /// Communities (courses) the user is affiliated with outside membership.
    pub course_affiliations: Vec<Uuid>,
}

impl Actor {
    /// Platform owners and admins.
    pub fn is_platform_manager(&self) -> bool {
        matches!(
            self.platform_role,
            PlatformRole::Owner | PlatformRole::Admin
        )
    }

    pub fn is_affiliated_with(&self, community_id: Uuid) -> bool {
        self.course_affiliations.contains(&community_id)
    }
}

/// Room database row, joined with the creator's display name and the live
/// count of active participants.
#[derive(Debug, Clone)]
pub struct RoomRow {
    pub room_id: Uuid,
    pub meet_code: String,
    pub name: String,
    pub created_by: Uuid,
    pub creator_display_name: Option<String>,
    pub visibility: Visibility,
    pub community_id: Option<Uuid>,
    pub max_participants: i32,
    pub allow_mic: bool,
    pub allow_video: bool,
    pub allow_screen_share: bool,
    /// Self-describing password hash. Never serialized.
    pub password_hash: Option<String>,
    pub state: RoomState,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub source_request_id: Option<Uuid>,
    pub active_participants: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Room request database row.
#[derive(Debug, Clone)]
pub struct RoomRequestRow {
    pub request_id: Uuid,
    pub requested_by: Uuid,
    pub requester_display_name: Option<String>,
    pub name: String,
    pub visibility: Visibility,
    pub community_id: Option<Uuid>,
    pub max_participants: i32,
    pub allow_mic: bool,
    pub allow_video: bool,
    pub allow_screen_share: bool,
    pub password_hash: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub expires_at: DateTime<Utc>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision_note: Option<String>,
    pub approved_room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomRequestRow {
    /// A pending request whose TTL has passed (whether or not swept yet).
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending && self.expires_at <= now
    }
}

/// Participant roster row, joined with the user's display name.
#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub mic_on: bool,
    pub video_on: bool,
    pub screen_on: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// Invite row. The token digest is deliberately not loaded.
#[derive(Debug, Clone)]
pub struct InviteRow {
    pub invite_id: Uuid,
    pub room_id: Uuid,
    pub issued_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One entry of the append-only moderation log.
#[derive(Debug, Clone)]
pub struct ModerationEvent {
    pub room_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub target_user_id: Option<Uuid>,
    pub action: ModerationAction,
    pub metadata: serde_json::Value,
}

impl ModerationEvent {
    pub fn new(action: ModerationAction, actor_id: Uuid) -> Self {
        Self {
            room_id: None,
            request_id: None,
            actor_id,
            target_user_id: None,
            action,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn room(mut self, room_id: Uuid) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn target(mut self, user_id: Uuid) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Validated room creation parameters, shared by direct create and request.
///
/// The password is still raw here; it is hashed before anything is persisted.
#[derive(Debug, Clone)]
pub struct RoomDraft {
    pub name: String,
    pub visibility: Visibility,
    /// Authorization scope. Stored on the room only for course-exclusive rooms.
    pub community_id: Option<Uuid>,
    pub max_participants: i32,
    pub allow_mic: bool,
    pub allow_video: bool,
    pub allow_screen_share: bool,
    pub password: Option<SecretString>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Room settings as persisted, with the password already hashed.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub name: String,
    pub visibility: Visibility,
    pub community_id: Option<Uuid>,
    pub max_participants: i32,
    pub allow_mic: bool,
    pub allow_video: bool,
    pub allow_screen_share: bool,
    pub password_hash: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl RoomSettings {
    /// Settings carried over from an approved request.
    pub fn from_request(request: &RoomRequestRow) -> Self {
        Self {
            name: request.name.clone(),
            visibility: request.visibility,
            community_id: request.community_id,
            max_participants: request.max_participants,
            allow_mic: request.allow_mic,
            allow_video: request.allow_video,
            allow_screen_share: request.allow_screen_share,
            password_hash: request.password_hash.clone(),
            scheduled_at: request.scheduled_at,
        }
    }

    /// Community reference to store on the materialized room.
    pub fn room_community_id(&self) -> Option<Uuid> {
        match self.visibility {
            Visibility::CourseExclusive => self.community_id,
            Visibility::Public | Visibility::Private => None,
        }
    }

    /// Initial state and `started_at` for a room materialized at `now`.
    pub fn initial_state(&self, now: DateTime<Utc>) -> (RoomState, Option<DateTime<Utc>>) {
        match self.scheduled_at {
            Some(at) if at > now + Duration::seconds(SCHEDULE_SKEW_SECONDS) => {
                (RoomState::Scheduled, None)
            }
            _ => (RoomState::Live, Some(now)),
        }
    }
}

/// Validate a room name, returning it trimmed.
pub fn validate_room_name(name: &str) -> Result<String, RoomError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len < MIN_ROOM_NAME_LENGTH {
        return Err(RoomError::Validation(format!(
            "Room name must be at least {MIN_ROOM_NAME_LENGTH} characters"
        )));
    }
    if len > MAX_ROOM_NAME_LENGTH {
        return Err(RoomError::Validation(format!(
            "Room name must be at most {MAX_ROOM_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn settings(scheduled_at: Option<DateTime<Utc>>) -> RoomSettings {
        RoomSettings {
            name: "Study Hall".to_string(),
            visibility: Visibility::Public,
            community_id: None,
            max_participants: 10,
            allow_mic: true,
            allow_video: true,
            allow_screen_share: true,
            password_hash: None,
            scheduled_at,
        }
    }

    #[test]
    fn test_enum_round_trip_through_db_strings() {
        for v in [
            Visibility::Public,
            Visibility::CourseExclusive,
            Visibility::Private,
        ] {
            assert_eq!(Visibility::from_db_str(v.as_str()), Some(v));
        }
        for s in [
            RoomState::Scheduled,
            RoomState::Live,
            RoomState::Ended,
            RoomState::Canceled,
        ] {
            assert_eq!(RoomState::from_db_str(s.as_str()), Some(s));
        }
        assert_eq!(RoomState::from_db_str("pending_approval"), None);
        assert_eq!(RequestStatus::from_db_str("bogus"), None);
    }

    #[test]
    fn test_room_state_transitions() {
        assert!(RoomState::Scheduled.can_transition_to(RoomState::Live));
        assert!(RoomState::Scheduled.can_transition_to(RoomState::Canceled));
        assert!(RoomState::Live.can_transition_to(RoomState::Ended));
        assert!(RoomState::Live.can_transition_to(RoomState::Canceled));

        assert!(!RoomState::Scheduled.can_transition_to(RoomState::Ended));
        assert!(!RoomState::Live.can_transition_to(RoomState::Scheduled));
        assert!(!RoomState::Ended.can_transition_to(RoomState::Live));
        assert!(!RoomState::Ended.can_transition_to(RoomState::Canceled));
        assert!(!RoomState::Canceled.can_transition_to(RoomState::Live));
    }

    #[test]
    fn test_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Visibility::CourseExclusive).unwrap(),
            "\"course_exclusive\""
        );
        assert_eq!(
            serde_json::to_string(&ParticipantRole::CoHost).unwrap(),
            "\"co_host\""
        );
    }

    #[test]
    fn test_initial_state_without_schedule_is_live() {
        let now = Utc::now();
        let (state, started_at) = settings(None).initial_state(now);
        assert_eq!(state, RoomState::Live);
        assert_eq!(started_at, Some(now));
    }

    #[test]
    fn test_initial_state_near_future_is_live() {
        let now = Utc::now();
        let (state, _) = settings(Some(now + Duration::seconds(30))).initial_state(now);
        assert_eq!(state, RoomState::Live);
    }

    #[test]
    fn test_initial_state_far_future_is_scheduled() {
        let now = Utc::now();
        let (state, started_at) = settings(Some(now + Duration::hours(2))).initial_state(now);
        assert_eq!(state, RoomState::Scheduled);
        assert_eq!(started_at, None);
    }

    #[test]
    fn test_room_community_only_for_course_exclusive() {
        let community = Uuid::new_v4();
        let mut s = settings(None);
        s.community_id = Some(community);

        s.visibility = Visibility::Private;
        assert_eq!(s.room_community_id(), None);

        s.visibility = Visibility::CourseExclusive;
        assert_eq!(s.room_community_id(), Some(community));
    }

    #[test]
    fn test_validate_room_name_trims_and_bounds() {
        assert_eq!(validate_room_name("  Study Hall  ").unwrap(), "Study Hall");
        assert!(validate_room_name("  ab ").is_err());
        assert!(validate_room_name(&"x".repeat(101)).is_err());
        assert!(validate_room_name(&"x".repeat(100)).is_ok());
    }

    #[test]
    fn test_actor_platform_manager() {
        let mut actor = Actor {
            user_id: Uuid::new_v4(),
            display_name: "Ada".to_string(),
            platform_role: PlatformRole::Member,
            course_affiliations: vec![],
        };
        assert!(!actor.is_platform_manager());
        actor.platform_role = PlatformRole::Admin;
        assert!(actor.is_platform_manager());
        actor.platform_role = PlatformRole::Owner;
        assert!(actor.is_platform_manager());
    }
}
