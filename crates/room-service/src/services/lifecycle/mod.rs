//! Lifecycle controller.
//!
//! Orchestrates every room operation against the store, using the admission
//! policy for decisions and the credential guard for passwords and invites.
//!
//! # Locking
//!
//! Relationship lookups (membership, moderator role, blocks), password
//! hashing and verification, and invite minting all happen before a
//! transaction is opened. Inside the transaction the room or request row is
//! locked (`FOR UPDATE`), the state precondition is re-checked on the locked
//! row, and the mutation is applied. Audit events are recorded after commit.
//!
//! Operations are split across this module (create, request, approve,
//! reject), [`presence`] (join, leave, start, end, cancel, kick, media,
//! invites) and [`queries`] (read-only views).

mod presence;
mod queries;

use crate::config::Config;
use crate::errors::RoomError;
use crate::models::{
    Actor, ApproveRequestResponse, CreateRoomRequest, CreateRoomResponse, ModerationAction,
    ModerationEvent, RequestStatus, ReviewRequestBody, RoomDraft, RoomRequestResponse,
    RoomRequestRow, RoomResponse, RoomRow, RoomSettings, Visibility,
};
use crate::observability::metrics;
use crate::repositories::{RoomParticipantsRepository, RoomRequestsRepository, RoomsRepository};
use crate::services::admission::{self, RoomRelations};
use crate::services::audit::{AuditDispatcher, AuditSink, PgAuditSink};
use crate::services::credentials::{self, MintedInvite};
use crate::services::directory::{BlockList, CommunityDirectory, PgBlockList, PgCommunityDirectory};
use crate::services::meet_code::insert_room_with_fresh_code;
use crate::services::rate_limiter::{FixedWindowRateLimiter, RateLimiter};
use crate::services::sweeper::ExpirySweeper;
use chrono::{Duration, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Tunables of the lifecycle controller.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub call_base_url: String,
    pub app_base_url: String,
    pub request_ttl: Duration,
    pub invite_ttl: Duration,
    pub max_pending_requests: i64,
    pub sweep_interval: std::time::Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_base_url: config.call_base_url.trim_end_matches('/').to_string(),
            app_base_url: config.app_base_url.trim_end_matches('/').to_string(),
            request_ttl: Duration::seconds(config.request_ttl_seconds),
            invite_ttl: Duration::seconds(config.invite_ttl_seconds),
            max_pending_requests: config.max_pending_requests,
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_seconds),
        }
    }
}

/// External contracts the controller depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn CommunityDirectory>,
    pub blocks: Arc<dyn BlockList>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// Production wiring: Postgres lookups, in-process rate limiter.
    pub fn postgres(pool: &PgPool, config: &Config) -> Self {
        Self {
            directory: Arc::new(PgCommunityDirectory::new(pool.clone())),
            blocks: Arc::new(PgBlockList::new(pool.clone())),
            rate_limiter: Arc::new(FixedWindowRateLimiter::new(
                config.rate_limit_max_actions,
                std::time::Duration::from_secs(config.rate_limit_window_seconds),
            )),
            audit: Arc::new(PgAuditSink::new(pool.clone())),
        }
    }
}

pub struct RoomLifecycle {
    pool: PgPool,
    settings: LifecycleSettings,
    directory: Arc<dyn CommunityDirectory>,
    blocks: Arc<dyn BlockList>,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: AuditDispatcher,
    sweeper: ExpirySweeper,
}

impl RoomLifecycle {
    pub fn new(pool: PgPool, settings: LifecycleSettings, collaborators: Collaborators) -> Self {
        let sweeper = ExpirySweeper::new(settings.sweep_interval);
        Self {
            pool,
            settings,
            directory: collaborators.directory,
            blocks: collaborators.blocks,
            rate_limiter: collaborators.rate_limiter,
            audit: AuditDispatcher::new(collaborators.audit),
            sweeper,
        }
    }

    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wait for queued moderation events to be appended.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    /// Call link for a room code.
    pub fn join_url(&self, code: &str) -> String {
        format!("{}/{}", self.settings.call_base_url, code)
    }

    /// Invite link carrying a raw invite token.
    pub fn invite_url(&self, code: &str, token: &SecretString) -> String {
        format!(
            "{}/rooms/{}?invite={}",
            self.settings.app_base_url,
            code,
            token.expose_secret()
        )
    }

    // ------------------------------------------------------------------
    // create
    // ------------------------------------------------------------------

    /// Create a room directly.
    ///
    /// Private rooms get one invite, issued by the creator, returned once.
    #[instrument(skip_all, name = "rooms.lifecycle.create", fields(user_id = %actor.user_id))]
    pub async fn create(
        &self,
        actor: &Actor,
        body: CreateRoomRequest,
    ) -> Result<CreateRoomResponse, RoomError> {
        let start = Instant::now();
        let result = self.create_inner(actor, body).await;
        record_outcome("create", start, &result);
        result
    }

    async fn create_inner(
        &self,
        actor: &Actor,
        body: CreateRoomRequest,
    ) -> Result<CreateRoomResponse, RoomError> {
        self.rate_limit(actor, "create_room").await?;

        let draft = body.validate(Utc::now())?;
        self.ensure_community_exists(draft.community_id).await?;

        let moderates = self.moderates(actor, draft.community_id).await?;
        if !admission::can_create_directly(actor, draft.visibility, draft.community_id, moderates) {
            return Err(RoomError::Forbidden(
                "You cannot create this room directly; submit a room request instead".to_string(),
            ));
        }

        let settings = seal_draft(draft).await?;
        let invite = mint_invite_for(settings.visibility)?;

        let now = Utc::now();
        let (state, started_at) = settings.initial_state(now);

        let mut tx = self.pool.begin().await?;
        let (room_id, code) = insert_room_with_fresh_code(
            &mut *tx,
            actor.user_id,
            &settings,
            state,
            started_at,
            None,
        )
        .await?;
        if let Some(minted) = &invite {
            credentials::store_invite(
                &mut *tx,
                room_id,
                actor.user_id,
                minted,
                self.settings.invite_ttl,
                now,
            )
            .await?;
        }
        tx.commit().await?;

        let room = self.load_room(room_id).await?;

        info!(
            target: "rooms.lifecycle",
            room_id = %room_id,
            meet_code = %code,
            user_id = %actor.user_id,
            visibility = room.visibility.as_str(),
            state = room.state.as_str(),
            "Room created"
        );

        self.emit(
            ModerationEvent::new(ModerationAction::CreateRoom, actor.user_id)
                .room(room_id)
                .metadata(json!({
                    "visibility": room.visibility.as_str(),
                    "state": room.state.as_str(),
                })),
        );

        Ok(self.created_response(&room, true, invite))
    }

    // ------------------------------------------------------------------
    // request
    // ------------------------------------------------------------------

    /// Ask for a room the actor cannot create directly.
    #[instrument(skip_all, name = "rooms.lifecycle.request", fields(user_id = %actor.user_id))]
    pub async fn request(
        &self,
        actor: &Actor,
        body: CreateRoomRequest,
    ) -> Result<RoomRequestResponse, RoomError> {
        let start = Instant::now();
        let result = self.request_inner(actor, body).await;
        record_outcome("request", start, &result);
        result
    }

    async fn request_inner(
        &self,
        actor: &Actor,
        body: CreateRoomRequest,
    ) -> Result<RoomRequestResponse, RoomError> {
        self.rate_limit(actor, "request_room").await?;
        self.sweeper.maybe_sweep(&self.pool).await;

        let draft = body.validate(Utc::now())?;
        self.ensure_community_exists(draft.community_id).await?;

        let moderates = self.moderates(actor, draft.community_id).await?;
        if admission::can_create_directly(actor, draft.visibility, draft.community_id, moderates) {
            return Err(RoomError::CanCreateDirectly);
        }

        let settings = seal_draft(draft).await?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        RoomRequestsRepository::lock_requester(&mut *tx, actor.user_id).await?;
        let pending = RoomRequestsRepository::count_pending(&mut *tx, actor.user_id, now).await?;
        if pending >= self.settings.max_pending_requests {
            return Err(RoomError::TooManyPending {
                limit: self.settings.max_pending_requests,
            });
        }
        let request = RoomRequestsRepository::insert(
            &mut *tx,
            actor.user_id,
            &settings,
            now + self.settings.request_ttl,
        )
        .await?;
        tx.commit().await?;

        info!(
            target: "rooms.lifecycle",
            request_id = %request.request_id,
            user_id = %actor.user_id,
            visibility = request.visibility.as_str(),
            "Room request submitted"
        );

        self.emit(
            ModerationEvent::new(ModerationAction::RequestRoom, actor.user_id)
                .request(request.request_id)
                .metadata(json!({ "visibility": request.visibility.as_str() })),
        );

        Ok(RoomRequestResponse::from(&request))
    }

    // ------------------------------------------------------------------
    // approve / reject
    // ------------------------------------------------------------------

    /// Approve a pending request, materializing its room.
    ///
    /// The room is created by the requester. For private rooms an invite is
    /// issued on the requester's behalf and returned once to the approver.
    #[instrument(skip_all, name = "rooms.lifecycle.approve", fields(request_id = %request_id))]
    pub async fn approve(
        &self,
        actor: &Actor,
        request_id: Uuid,
        body: ReviewRequestBody,
    ) -> Result<ApproveRequestResponse, RoomError> {
        let start = Instant::now();
        let result = self.approve_inner(actor, request_id, body).await;
        record_outcome("approve", start, &result);
        result
    }

    async fn approve_inner(
        &self,
        actor: &Actor,
        request_id: Uuid,
        body: ReviewRequestBody,
    ) -> Result<ApproveRequestResponse, RoomError> {
        self.rate_limit(actor, "approve_request").await?;
        let note = body.validated_note()?;
        self.sweeper.maybe_sweep(&self.pool).await;

        let (request, moderates) = self.authorize_review(actor, request_id).await?;
        let invite = mint_invite_for(request.visibility)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let locked = RoomRequestsRepository::lock_by_id(&mut *tx, request_id)
            .await?
            .ok_or_else(request_not_found)?;

        if locked.is_overdue(now) {
            RoomRequestsRepository::mark_expired(&mut *tx, request_id).await?;
            tx.commit().await?;
            info!(target: "rooms.lifecycle", request_id = %request_id, "Room request expired before review");
            return Err(RoomError::Gone("Room request has expired".to_string()));
        }
        ensure_pending(&locked)?;

        let settings = RoomSettings::from_request(&locked);
        let (state, started_at) = settings.initial_state(now);
        let (room_id, code) = insert_room_with_fresh_code(
            &mut *tx,
            locked.requested_by,
            &settings,
            state,
            started_at,
            Some(request_id),
        )
        .await?;

        if !RoomRequestsRepository::mark_approved(
            &mut *tx,
            request_id,
            actor.user_id,
            note.as_deref(),
            room_id,
            now,
        )
        .await?
        {
            return Err(RoomError::Conflict(
                "Room request has already been reviewed".to_string(),
            ));
        }

        if let Some(minted) = &invite {
            credentials::store_invite(
                &mut *tx,
                room_id,
                locked.requested_by,
                minted,
                self.settings.invite_ttl,
                now,
            )
            .await?;
        }
        tx.commit().await?;

        let room = self.load_room(room_id).await?;
        let reviewed = RoomRequestsRepository::find_by_id(&self.pool, request_id)
            .await?
            .ok_or_else(request_not_found)?;

        info!(
            target: "rooms.lifecycle",
            request_id = %request_id,
            room_id = %room_id,
            meet_code = %code,
            reviewer = %actor.user_id,
            "Room request approved"
        );

        self.emit(
            ModerationEvent::new(ModerationAction::ApproveRequest, actor.user_id)
                .request(request_id)
                .room(room_id)
                .target(reviewed.requested_by),
        );
        self.emit(
            ModerationEvent::new(ModerationAction::CreateRoom, actor.user_id)
                .room(room_id)
                .request(request_id)
                .target(reviewed.requested_by)
                .metadata(json!({
                    "visibility": room.visibility.as_str(),
                    "state": room.state.as_str(),
                })),
        );

        let relations = RoomRelations {
            community_moderator: moderates,
            ..RoomRelations::default()
        };
        let can_manage = admission::can_manage(actor, &room, &relations);

        Ok(ApproveRequestResponse {
            request: RoomRequestResponse::from(&reviewed),
            created: self.created_response(&room, can_manage, invite),
        })
    }

    /// Reject a pending request with an optional note.
    #[instrument(skip_all, name = "rooms.lifecycle.reject", fields(request_id = %request_id))]
    pub async fn reject(
        &self,
        actor: &Actor,
        request_id: Uuid,
        body: ReviewRequestBody,
    ) -> Result<RoomRequestResponse, RoomError> {
        let start = Instant::now();
        let result = self.reject_inner(actor, request_id, body).await;
        record_outcome("reject", start, &result);
        result
    }

    async fn reject_inner(
        &self,
        actor: &Actor,
        request_id: Uuid,
        body: ReviewRequestBody,
    ) -> Result<RoomRequestResponse, RoomError> {
        self.rate_limit(actor, "reject_request").await?;
        let note = body.validated_note()?;
        self.sweeper.maybe_sweep(&self.pool).await;

        self.authorize_review(actor, request_id).await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let locked = RoomRequestsRepository::lock_by_id(&mut *tx, request_id)
            .await?
            .ok_or_else(request_not_found)?;

        if locked.is_overdue(now) {
            RoomRequestsRepository::mark_expired(&mut *tx, request_id).await?;
            tx.commit().await?;
            return Err(RoomError::Gone("Room request has expired".to_string()));
        }
        ensure_pending(&locked)?;

        if !RoomRequestsRepository::mark_rejected(
            &mut *tx,
            request_id,
            actor.user_id,
            note.as_deref(),
            now,
        )
        .await?
        {
            return Err(RoomError::Conflict(
                "Room request has already been reviewed".to_string(),
            ));
        }
        tx.commit().await?;

        let reviewed = RoomRequestsRepository::find_by_id(&self.pool, request_id)
            .await?
            .ok_or_else(request_not_found)?;

        info!(
            target: "rooms.lifecycle",
            request_id = %request_id,
            reviewer = %actor.user_id,
            "Room request rejected"
        );

        self.emit(
            ModerationEvent::new(ModerationAction::RejectRequest, actor.user_id)
                .request(request_id)
                .target(reviewed.requested_by)
                .metadata(json!({ "note": note })),
        );

        Ok(RoomRequestResponse::from(&reviewed))
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Load a request and check the actor may review it.
    ///
    /// Only immutable request fields are consulted, so this runs before the
    /// request row is locked. Requests the actor cannot see are not found.
    async fn authorize_review(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> Result<(RoomRequestRow, bool), RoomError> {
        let request = RoomRequestsRepository::find_by_id(&self.pool, request_id)
            .await?
            .ok_or_else(request_not_found)?;
        let moderates = self.moderates(actor, request.community_id).await?;

        if !admission::can_see_request(actor, &request, moderates) {
            return Err(request_not_found());
        }
        admission::authorize_review(actor, &request, moderates)?;
        Ok((request, moderates))
    }

    async fn rate_limit(&self, actor: &Actor, action: &'static str) -> Result<(), RoomError> {
        if self.rate_limiter.allow(actor.user_id, action).await {
            return Ok(());
        }
        metrics::record_rate_limited(action);
        warn!(
            target: "rooms.lifecycle",
            user_id = %actor.user_id,
            action,
            "Rate limit exceeded"
        );
        Err(RoomError::RateLimitExceeded)
    }

    /// Queue a moderation event. The append never delays the caller.
    fn emit(&self, event: ModerationEvent) {
        self.audit.dispatch(event);
    }

    async fn moderates(&self, actor: &Actor, community_id: Option<Uuid>) -> Result<bool, RoomError> {
        match community_id {
            Some(community_id) => self.directory.is_moderator(community_id, actor.user_id).await,
            None => Ok(false),
        }
    }

    async fn ensure_community_exists(&self, community_id: Option<Uuid>) -> Result<(), RoomError> {
        if let Some(community_id) = community_id {
            if !self.directory.community_exists(community_id).await? {
                return Err(RoomError::Validation("Community does not exist".to_string()));
            }
        }
        Ok(())
    }

    /// The actor's relationship to `room`, looked up without locks.
    async fn relations_for(&self, actor: &Actor, room: &RoomRow) -> Result<RoomRelations, RoomError> {
        let (community_member, community_moderator) = match room.community_id {
            Some(community_id) => (
                self.directory.is_member(community_id, actor.user_id).await?,
                self.directory
                    .is_moderator(community_id, actor.user_id)
                    .await?,
            ),
            None => (false, false),
        };
        let blocked_with_creator = room.created_by != actor.user_id
            && self
                .blocks
                .are_mutually_blocked(actor.user_id, room.created_by)
                .await?;
        let has_participant_history =
            RoomParticipantsRepository::find(&self.pool, room.room_id, actor.user_id)
                .await?
                .is_some();

        Ok(RoomRelations {
            community_member,
            community_moderator,
            blocked_with_creator,
            has_participant_history,
        })
    }

    async fn load_room(&self, room_id: Uuid) -> Result<RoomRow, RoomError> {
        RoomsRepository::find_by_id(&self.pool, room_id)
            .await?
            .ok_or_else(room_not_found)
    }

    async fn find_room(&self, code: &str) -> Result<RoomRow, RoomError> {
        RoomsRepository::find_by_code(&self.pool, code)
            .await?
            .ok_or_else(room_not_found)
    }

    fn created_response(
        &self,
        room: &RoomRow,
        can_manage: bool,
        invite: Option<MintedInvite>,
    ) -> CreateRoomResponse {
        let (invite_url, invite_token) = match invite {
            Some(minted) => (
                Some(self.invite_url(&room.meet_code, &minted.token)),
                Some(minted.token.expose_secret().to_string()),
            ),
            None => (None, None),
        };
        CreateRoomResponse {
            room: RoomResponse::from_row(room, can_manage),
            join_url: self.join_url(&room.meet_code),
            invite_url,
            invite_token,
        }
    }
}

/// Hash the draft's password (off the async runtime) into persistable settings.
async fn seal_draft(draft: RoomDraft) -> Result<RoomSettings, RoomError> {
    let password_hash = match draft.password {
        Some(password) => Some(
            tokio::task::spawn_blocking(move || credentials::hash_password(&password))
                .await
                .map_err(|e| RoomError::Internal(format!("Password hashing task failed: {e}")))??,
        ),
        None => None,
    };

    Ok(RoomSettings {
        name: draft.name,
        visibility: draft.visibility,
        community_id: draft.community_id,
        max_participants: draft.max_participants,
        allow_mic: draft.allow_mic,
        allow_video: draft.allow_video,
        allow_screen_share: draft.allow_screen_share,
        password_hash,
        scheduled_at: draft.scheduled_at,
    })
}

fn mint_invite_for(visibility: Visibility) -> Result<Option<MintedInvite>, RoomError> {
    match visibility {
        Visibility::Private => credentials::mint_invite().map(Some),
        Visibility::Public | Visibility::CourseExclusive => Ok(None),
    }
}

/// Precondition for a review decision on a locked, not overdue request.
fn ensure_pending(request: &RoomRequestRow) -> Result<(), RoomError> {
    match request.status {
        RequestStatus::Pending => Ok(()),
        RequestStatus::Expired => Err(RoomError::Gone("Room request has expired".to_string())),
        RequestStatus::Approved | RequestStatus::Rejected => Err(RoomError::Conflict(
            "Room request has already been reviewed".to_string(),
        )),
    }
}

fn record_outcome<T>(operation: &'static str, start: Instant, result: &Result<T, RoomError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    metrics::record_lifecycle_operation(operation, outcome, start.elapsed());
}

fn room_not_found() -> RoomError {
    RoomError::NotFound("Room not found".to_string())
}

fn request_not_found() -> RoomError {
    RoomError::NotFound("Room request not found".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request_with_status(status: RequestStatus) -> RoomRequestRow {
        let now = Utc::now();
        RoomRequestRow {
            request_id: Uuid::new_v4(),
            requested_by: Uuid::new_v4(),
            requester_display_name: None,
            name: "Study Hall".to_string(),
            visibility: Visibility::Public,
            community_id: None,
            max_participants: 10,
            allow_mic: true,
            allow_video: true,
            allow_screen_share: true,
            password_hash: None,
            scheduled_at: None,
            status,
            expires_at: now + Duration::hours(24),
            reviewed_by: None,
            reviewed_at: None,
            decision_note: None,
            approved_room_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_ensure_pending_outcomes() {
        assert!(ensure_pending(&request_with_status(RequestStatus::Pending)).is_ok());
        assert!(matches!(
            ensure_pending(&request_with_status(RequestStatus::Approved)),
            Err(RoomError::Conflict(_))
        ));
        assert!(matches!(
            ensure_pending(&request_with_status(RequestStatus::Rejected)),
            Err(RoomError::Conflict(_))
        ));
        assert!(matches!(
            ensure_pending(&request_with_status(RequestStatus::Expired)),
            Err(RoomError::Gone(_))
        ));
    }

    #[test]
    fn test_only_private_rooms_mint_invites() {
        assert!(mint_invite_for(Visibility::Private).unwrap().is_some());
        assert!(mint_invite_for(Visibility::Public).unwrap().is_none());
        assert!(mint_invite_for(Visibility::CourseExclusive)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_seal_draft_hashes_password() {
        let draft = RoomDraft {
            name: "Study Hall".to_string(),
            visibility: Visibility::Private,
            community_id: None,
            max_participants: 10,
            allow_mic: true,
            allow_video: true,
            allow_screen_share: true,
            password: Some(SecretString::from("open-sesame")),
            scheduled_at: None,
        };
        let settings = seal_draft(draft).await.unwrap();
        let hash = settings.password_hash.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(credentials::verify_password(
            &SecretString::from("open-sesame"),
            &hash
        ));
    }

    #[test]
    fn test_settings_trim_trailing_slashes() {
        let vars = std::collections::HashMap::from([
            ("DATABASE_URL".to_string(), "postgresql://localhost/rooms".to_string()),
            ("ROOM_CALL_BASE_URL".to_string(), "https://call.example/".to_string()),
            ("ROOM_APP_BASE_URL".to_string(), "https://app.example/".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let settings = LifecycleSettings::from_config(&config);

        assert_eq!(settings.call_base_url, "https://call.example");
        assert_eq!(settings.app_base_url, "https://app.example");
    }
}
