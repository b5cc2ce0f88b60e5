//! Join, leave and the room state transitions driven by managers.
//!
//! Join is the contended path: capacity is recounted on the locked room row
//! immediately before the participant row is written, so concurrent joiners
//! racing for the last slot serialize on the room lock.

use super::{record_outcome, room_not_found, RoomLifecycle};
use crate::errors::RoomError;
use crate::models::{
    Actor, InviteResponse, JoinRoomRequest, JoinRoomResponse, MediaStateRequest,
    ModerationAction, ModerationEvent, ParticipantResponse, ParticipantStatus, RoomResponse,
    RoomRow, RoomState, Visibility,
};
use crate::repositories::{RoomInvitesRepository, RoomParticipantsRepository, RoomsRepository};
use crate::services::admission::{self, JoinCredentials, RoomRelations, StateGate};
use crate::services::credentials::{self, PasswordCheck};
use chrono::Utc;
use common::secret::ExposeSecret;
use serde_json::json;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of a manager-driven transition on the locked room.
enum Transition {
    Applied(RoomState),
    AlreadyThere,
}

impl RoomLifecycle {
    // ------------------------------------------------------------------
    // join / leave
    // ------------------------------------------------------------------

    /// Join a room by meet code.
    ///
    /// Already being an active participant is a success. A manager joining a
    /// scheduled room starts it.
    #[instrument(skip_all, name = "rooms.lifecycle.join", fields(meet_code = %code))]
    pub async fn join(
        &self,
        actor: &Actor,
        code: &str,
        body: JoinRoomRequest,
    ) -> Result<JoinRoomResponse, RoomError> {
        let start = Instant::now();
        let result = self.join_inner(actor, code, body).await;
        record_outcome("join", start, &result);
        result
    }

    async fn join_inner(
        &self,
        actor: &Actor,
        code: &str,
        body: JoinRoomRequest,
    ) -> Result<JoinRoomResponse, RoomError> {
        self.rate_limit(actor, "join_room").await?;

        let room = self.find_room(code).await?;
        let relations = self.relations_for(actor, &room).await?;
        let is_manager = admission::can_manage(actor, &room, &relations);

        let credentials = if is_manager || room.visibility != Visibility::Private {
            JoinCredentials::none()
        } else {
            self.check_join_credentials(&room, body).await?
        };
        admission::check_access(actor, &room, &relations, &credentials)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let locked = RoomsRepository::lock_by_id(&mut *tx, room.room_id)
            .await?
            .ok_or_else(room_not_found)?;
        let gate = admission::check_state_for_join(locked.state, is_manager)?;

        let existing =
            RoomParticipantsRepository::find(&mut *tx, locked.room_id, actor.user_id).await?;
        if let Some(participant) = &existing {
            match participant.status {
                ParticipantStatus::Active => {
                    tx.commit().await?;
                    let room = self.load_room(locked.room_id).await?;
                    return Ok(JoinRoomResponse {
                        call_url: self.join_url(&room.meet_code),
                        role: participant.role,
                        room: RoomResponse::from_row(&room, is_manager),
                    });
                }
                ParticipantStatus::Kicked if !is_manager => {
                    return Err(RoomError::Forbidden(
                        "You were removed from this room".to_string(),
                    ));
                }
                ParticipantStatus::Kicked | ParticipantStatus::Left => {}
            }
        }

        let started = match gate {
            StateGate::ImplicitStart => {
                RoomsRepository::mark_live(&mut *tx, locked.room_id, now).await?
            }
            StateGate::Live => false,
        };

        let active = RoomParticipantsRepository::count_active(&mut *tx, locked.room_id).await?;
        if active >= i64::from(locked.max_participants) {
            return Err(RoomError::Conflict("Room is full".to_string()));
        }

        let role = admission::participant_role(actor, &locked, is_manager);
        RoomParticipantsRepository::activate(&mut *tx, locked.room_id, actor.user_id, role)
            .await?;
        tx.commit().await?;

        info!(
            target: "rooms.lifecycle",
            room_id = %locked.room_id,
            user_id = %actor.user_id,
            role = role.as_str(),
            "Participant joined room"
        );

        if started {
            info!(target: "rooms.lifecycle", room_id = %locked.room_id, "Room started by manager join");
            self.emit(
                ModerationEvent::new(ModerationAction::StartRoom, actor.user_id)
                    .room(locked.room_id)
                    .metadata(json!({ "trigger": "join" })),
            );
        }

        let room = self.load_room(locked.room_id).await?;
        Ok(JoinRoomResponse {
            call_url: self.join_url(&room.meet_code),
            role,
            room: RoomResponse::from_row(&room, is_manager),
        })
    }

    /// Check a private-room invite token and password, outside any lock.
    ///
    /// A valid invite short-circuits the password check.
    async fn check_join_credentials(
        &self,
        room: &RoomRow,
        body: JoinRoomRequest,
    ) -> Result<JoinCredentials, RoomError> {
        let now = Utc::now();
        let invite_valid = match &body.invite_token {
            Some(token) => credentials::check_invite(&self.pool, room.room_id, token, now).await?,
            None => false,
        };
        if invite_valid {
            return Ok(JoinCredentials {
                invite_valid,
                password: PasswordCheck::NotRequired,
            });
        }

        let stored = room.password_hash.clone();
        let supplied = body.password;
        let password = tokio::task::spawn_blocking(move || {
            credentials::check_room_password(stored.as_deref(), supplied.as_ref())
        })
        .await
        .map_err(|e| RoomError::Internal(format!("Password check task failed: {e}")))?;

        if password == PasswordCheck::Mismatch {
            warn!(
                target: "rooms.lifecycle",
                room_id = %room.room_id,
                "Join rejected: incorrect room password"
            );
        }

        Ok(JoinCredentials {
            invite_valid,
            password,
        })
    }

    /// Leave a room. Not being an active participant is a no-op.
    #[instrument(skip_all, name = "rooms.lifecycle.leave", fields(meet_code = %code))]
    pub async fn leave(&self, actor: &Actor, code: &str) -> Result<(), RoomError> {
        let start = Instant::now();
        let result = self.leave_inner(actor, code).await;
        record_outcome("leave", start, &result);
        result
    }

    async fn leave_inner(&self, actor: &Actor, code: &str) -> Result<(), RoomError> {
        self.rate_limit(actor, "leave_room").await?;
        let room = self.find_room(code).await?;

        if RoomParticipantsRepository::mark_left(&self.pool, room.room_id, actor.user_id).await? {
            info!(
                target: "rooms.lifecycle",
                room_id = %room.room_id,
                user_id = %actor.user_id,
                "Participant left room"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // start / end / cancel
    // ------------------------------------------------------------------

    /// Force a scheduled room live early. Already live is a no-op.
    #[instrument(skip_all, name = "rooms.lifecycle.start", fields(meet_code = %code))]
    pub async fn start(&self, actor: &Actor, code: &str) -> Result<RoomResponse, RoomError> {
        let start = Instant::now();
        let result = self
            .transition(actor, code, "start_room", |state| match state {
                RoomState::Scheduled => Ok(Some(RoomState::Live)),
                RoomState::Live => Ok(None),
                RoomState::Ended => Err(RoomError::Conflict("Room has ended".to_string())),
                RoomState::Canceled => Err(RoomError::Conflict("Room was canceled".to_string())),
            })
            .await;
        record_outcome("start", start, &result);
        result
    }

    /// End a live room, closing every active participant row.
    ///
    /// Ending an ended room is a no-op and records no second event. A
    /// scheduled room cannot end; cancel it instead.
    #[instrument(skip_all, name = "rooms.lifecycle.end", fields(meet_code = %code))]
    pub async fn end(&self, actor: &Actor, code: &str) -> Result<RoomResponse, RoomError> {
        let start = Instant::now();
        let result = self
            .transition(actor, code, "end_room", |state| match state {
                RoomState::Live => Ok(Some(RoomState::Ended)),
                RoomState::Ended => Ok(None),
                RoomState::Scheduled => Err(RoomError::Conflict(
                    "Room has not started; cancel it instead".to_string(),
                )),
                RoomState::Canceled => Err(RoomError::Conflict("Room was canceled".to_string())),
            })
            .await;
        record_outcome("end", start, &result);
        result
    }

    /// Cancel a scheduled or live room. Every active participant is kicked.
    #[instrument(skip_all, name = "rooms.lifecycle.cancel", fields(meet_code = %code))]
    pub async fn cancel(&self, actor: &Actor, code: &str) -> Result<RoomResponse, RoomError> {
        let start = Instant::now();
        let result = self
            .transition(actor, code, "cancel_room", |state| match state {
                RoomState::Scheduled | RoomState::Live => Ok(Some(RoomState::Canceled)),
                RoomState::Canceled => Ok(None),
                RoomState::Ended => Err(RoomError::Conflict("Room has already ended".to_string())),
            })
            .await;
        record_outcome("cancel", start, &result);
        result
    }

    /// Shared manager transition: check rights, lock, decide on the locked
    /// state, apply, commit, then emit.
    async fn transition<F>(
        &self,
        actor: &Actor,
        code: &str,
        action: &'static str,
        decide: F,
    ) -> Result<RoomResponse, RoomError>
    where
        F: FnOnce(RoomState) -> Result<Option<RoomState>, RoomError>,
    {
        self.rate_limit(actor, action).await?;
        let room = self.find_room(code).await?;
        self.require_manager(actor, &room).await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let locked = RoomsRepository::lock_by_id(&mut *tx, room.room_id)
            .await?
            .ok_or_else(room_not_found)?;

        let mut closed_participants = 0u64;
        let outcome = match decide(locked.state)? {
            None => Transition::AlreadyThere,
            Some(next) => {
                if !locked.state.can_transition_to(next) {
                    return Err(RoomError::Conflict(format!(
                        "Room cannot move from {} to {}",
                        locked.state.as_str(),
                        next.as_str()
                    )));
                }
                let applied = match next {
                    RoomState::Live => RoomsRepository::mark_live(&mut *tx, locked.room_id, now).await?,
                    RoomState::Ended => {
                        let ended =
                            RoomsRepository::mark_ended(&mut *tx, locked.room_id, now).await?;
                        closed_participants = RoomParticipantsRepository::close_all_active(
                            &mut *tx,
                            locked.room_id,
                            Some(actor.user_id),
                        )
                        .await?;
                        ended
                    }
                    RoomState::Canceled => {
                        let canceled =
                            RoomsRepository::mark_canceled(&mut *tx, locked.room_id, now).await?;
                        closed_participants = RoomParticipantsRepository::close_all_active(
                            &mut *tx,
                            locked.room_id,
                            None,
                        )
                        .await?;
                        canceled
                    }
                    RoomState::Scheduled => false,
                };
                if !applied {
                    return Err(RoomError::Conflict(
                        "Room state changed concurrently".to_string(),
                    ));
                }
                Transition::Applied(next)
            }
        };
        tx.commit().await?;

        let room = self.load_room(locked.room_id).await?;

        if let Transition::Applied(next) = outcome {
            info!(
                target: "rooms.lifecycle",
                room_id = %room.room_id,
                user_id = %actor.user_id,
                state = next.as_str(),
                closed_participants,
                "Room state changed"
            );
            let event_action = match next {
                RoomState::Live => ModerationAction::StartRoom,
                RoomState::Ended => ModerationAction::EndRoom,
                RoomState::Canceled | RoomState::Scheduled => ModerationAction::CancelRoom,
            };
            self.emit(
                ModerationEvent::new(event_action, actor.user_id)
                    .room(room.room_id)
                    .metadata(json!({ "closed_participants": closed_participants })),
            );
        }

        Ok(RoomResponse::from_row(&room, true))
    }

    // ------------------------------------------------------------------
    // kick / media
    // ------------------------------------------------------------------

    /// Remove an active participant. The creator cannot be removed.
    #[instrument(skip_all, name = "rooms.lifecycle.kick", fields(meet_code = %code, target = %target_user_id))]
    pub async fn kick(
        &self,
        actor: &Actor,
        code: &str,
        target_user_id: Uuid,
    ) -> Result<(), RoomError> {
        let start = Instant::now();
        let result = self.kick_inner(actor, code, target_user_id).await;
        record_outcome("kick", start, &result);
        result
    }

    async fn kick_inner(
        &self,
        actor: &Actor,
        code: &str,
        target_user_id: Uuid,
    ) -> Result<(), RoomError> {
        self.rate_limit(actor, "kick_participant").await?;
        let room = self.find_room(code).await?;
        self.require_manager(actor, &room).await?;

        if target_user_id == actor.user_id {
            return Err(RoomError::Validation(
                "Use leave to exit a room yourself".to_string(),
            ));
        }
        if target_user_id == room.created_by {
            return Err(RoomError::Forbidden(
                "The room creator cannot be removed".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        RoomsRepository::lock_by_id(&mut *tx, room.room_id)
            .await?
            .ok_or_else(room_not_found)?;
        if !RoomParticipantsRepository::mark_kicked(&mut *tx, room.room_id, target_user_id).await? {
            return Err(RoomError::NotFound(
                "Participant is not in this room".to_string(),
            ));
        }
        tx.commit().await?;

        info!(
            target: "rooms.lifecycle",
            room_id = %room.room_id,
            user_id = %actor.user_id,
            target = %target_user_id,
            "Participant kicked"
        );

        self.emit(
            ModerationEvent::new(ModerationAction::KickParticipant, actor.user_id)
                .room(room.room_id)
                .target(target_user_id),
        );

        Ok(())
    }

    /// Toggle the caller's own mic, video or screen share.
    #[instrument(skip_all, name = "rooms.lifecycle.update_media", fields(meet_code = %code))]
    pub async fn update_media(
        &self,
        actor: &Actor,
        code: &str,
        body: MediaStateRequest,
    ) -> Result<ParticipantResponse, RoomError> {
        let start = Instant::now();
        let result = self.update_media_inner(actor, code, body).await;
        record_outcome("update_media", start, &result);
        result
    }

    async fn update_media_inner(
        &self,
        actor: &Actor,
        code: &str,
        body: MediaStateRequest,
    ) -> Result<ParticipantResponse, RoomError> {
        self.rate_limit(actor, "update_media").await?;

        if body.mic_on.is_none() && body.video_on.is_none() && body.screen_on.is_none() {
            return Err(RoomError::Validation("No changes provided".to_string()));
        }

        let room = self.find_room(code).await?;
        for (requested, allowed, feature) in [
            (body.mic_on, room.allow_mic, "Microphone"),
            (body.video_on, room.allow_video, "Video"),
            (body.screen_on, room.allow_screen_share, "Screen sharing"),
        ] {
            if requested == Some(true) && !allowed {
                return Err(RoomError::Forbidden(format!(
                    "{feature} is disabled in this room"
                )));
            }
        }

        let participant = RoomParticipantsRepository::update_media(
            &self.pool,
            room.room_id,
            actor.user_id,
            body.mic_on,
            body.video_on,
            body.screen_on,
        )
        .await?
        .ok_or_else(|| RoomError::Conflict("You are not in this room".to_string()))?;

        Ok(ParticipantResponse::from(&participant))
    }

    // ------------------------------------------------------------------
    // invites
    // ------------------------------------------------------------------

    /// Issue an invite to a private room. The raw token is returned once.
    #[instrument(skip_all, name = "rooms.lifecycle.issue_invite", fields(meet_code = %code))]
    pub async fn issue_invite(&self, actor: &Actor, code: &str) -> Result<InviteResponse, RoomError> {
        let start = Instant::now();
        let result = self.issue_invite_inner(actor, code).await;
        record_outcome("issue_invite", start, &result);
        result
    }

    async fn issue_invite_inner(&self, actor: &Actor, code: &str) -> Result<InviteResponse, RoomError> {
        self.rate_limit(actor, "issue_invite").await?;
        let room = self.find_room(code).await?;
        self.require_manager(actor, &room).await?;

        if room.visibility != Visibility::Private {
            return Err(RoomError::Validation(
                "Invites are only used by private rooms".to_string(),
            ));
        }
        if room.state.is_closed() {
            return Err(RoomError::Conflict("Room is closed".to_string()));
        }

        let minted = credentials::mint_invite()?;
        let invite = credentials::store_invite(
            &self.pool,
            room.room_id,
            actor.user_id,
            &minted,
            self.settings.invite_ttl,
            Utc::now(),
        )
        .await?;

        info!(
            target: "rooms.lifecycle",
            room_id = %room.room_id,
            invite_id = %invite.invite_id,
            user_id = %actor.user_id,
            "Invite issued"
        );

        Ok(InviteResponse {
            invite_id: invite.invite_id,
            invite_url: self.invite_url(&room.meet_code, &minted.token),
            token: minted.token.expose_secret().to_string(),
            expires_at: invite.expires_at,
        })
    }

    /// Revoke an invite. Revoking twice keeps the first revocation time.
    #[instrument(skip_all, name = "rooms.lifecycle.revoke_invite", fields(meet_code = %code, invite_id = %invite_id))]
    pub async fn revoke_invite(
        &self,
        actor: &Actor,
        code: &str,
        invite_id: Uuid,
    ) -> Result<(), RoomError> {
        let start = Instant::now();
        let result = self.revoke_invite_inner(actor, code, invite_id).await;
        record_outcome("revoke_invite", start, &result);
        result
    }

    async fn revoke_invite_inner(
        &self,
        actor: &Actor,
        code: &str,
        invite_id: Uuid,
    ) -> Result<(), RoomError> {
        self.rate_limit(actor, "revoke_invite").await?;
        let room = self.find_room(code).await?;
        self.require_manager(actor, &room).await?;

        if !RoomInvitesRepository::revoke(&self.pool, room.room_id, invite_id).await? {
            return Err(RoomError::NotFound("Invite not found".to_string()));
        }

        info!(
            target: "rooms.lifecycle",
            room_id = %room.room_id,
            invite_id = %invite_id,
            "Invite revoked"
        );
        Ok(())
    }

    /// Managers pass. Others get `NotFound` if they cannot even see the
    /// room, `Forbidden` otherwise.
    pub(super) async fn require_manager(
        &self,
        actor: &Actor,
        room: &RoomRow,
    ) -> Result<RoomRelations, RoomError> {
        let relations = self.relations_for(actor, room).await?;
        if admission::can_manage(actor, room, &relations) {
            return Ok(relations);
        }
        if !admission::can_view(actor, room, &relations) {
            return Err(room_not_found());
        }
        Err(RoomError::Forbidden(
            "Only room managers can do this".to_string(),
        ))
    }
}
