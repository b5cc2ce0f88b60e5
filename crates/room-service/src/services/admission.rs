//! Admission policy.
//!
//! Pure decisions over an [`Actor`], a room or request, and relationship
//! facts gathered beforehand by the lifecycle controller (community
//! membership, moderator role, blocks). Nothing here touches the store.
//!
//! A *manager* of a room is a platform owner or admin, the room's creator, or
//! a moderator of the room's community.

use crate::errors::RoomError;
use crate::models::{Actor, ParticipantRole, RoomRequestRow, RoomRow, RoomState, Visibility};
use crate::services::credentials::PasswordCheck;
use uuid::Uuid;

/// The caller's relationship to one room, looked up outside any lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomRelations {
    /// Active member of the room's community.
    pub community_member: bool,
    /// Moderator or owner of the room's community.
    pub community_moderator: bool,
    /// Caller and creator have blocked each other (either direction).
    pub blocked_with_creator: bool,
    /// Caller has a participant row in the room, in any status.
    pub has_participant_history: bool,
}

/// Private-room credentials presented on join, already checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinCredentials {
    pub invite_valid: bool,
    pub password: PasswordCheck,
}

impl JoinCredentials {
    pub fn none() -> Self {
        Self {
            invite_valid: false,
            password: PasswordCheck::NotRequired,
        }
    }
}

/// How a join interacts with the room state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateGate {
    /// Room is live; join normally.
    Live,
    /// Room is scheduled and the caller manages it; joining starts it.
    ImplicitStart,
}

/// Whether `actor` may create a room of this kind without review.
///
/// Owners and admins may create anything. Community moderators may create
/// course-exclusive and private rooms scoped to a community they moderate.
/// Nobody else may create directly; public rooms always need an owner or admin.
pub fn can_create_directly(
    actor: &Actor,
    visibility: Visibility,
    community_id: Option<Uuid>,
    moderates_community: bool,
) -> bool {
    if actor.is_platform_manager() {
        return true;
    }
    match visibility {
        Visibility::Public => false,
        Visibility::CourseExclusive | Visibility::Private => {
            community_id.is_some() && moderates_community
        }
    }
}

/// Whether `actor` may approve or reject `request`.
///
/// The reviewers of a request are exactly those who could have created the
/// room directly, minus the requester.
pub fn authorize_review(
    actor: &Actor,
    request: &RoomRequestRow,
    moderates_community: bool,
) -> Result<(), RoomError> {
    if actor.user_id == request.requested_by {
        return Err(RoomError::Forbidden(
            "You cannot review your own request".to_string(),
        ));
    }
    if !can_create_directly(
        actor,
        request.visibility,
        request.community_id,
        moderates_community,
    ) {
        return Err(RoomError::Forbidden(
            "You are not allowed to review this request".to_string(),
        ));
    }
    Ok(())
}

/// Whether `actor` may see `request` at all (listing, approve, reject).
pub fn can_see_request(actor: &Actor, request: &RoomRequestRow, moderates_community: bool) -> bool {
    actor.user_id == request.requested_by
        || can_create_directly(
            actor,
            request.visibility,
            request.community_id,
            moderates_community,
        )
}

pub fn can_manage(actor: &Actor, room: &RoomRow, relations: &RoomRelations) -> bool {
    actor.is_platform_manager()
        || room.created_by == actor.user_id
        || (room.community_id.is_some() && relations.community_moderator)
}

/// View rules for get and list. Invisible rooms are reported as not found.
pub fn can_view(actor: &Actor, room: &RoomRow, relations: &RoomRelations) -> bool {
    if can_manage(actor, room, relations) {
        return true;
    }
    match room.visibility {
        Visibility::Public => !relations.blocked_with_creator,
        Visibility::CourseExclusive => {
            in_course(actor, room, relations) || relations.has_participant_history
        }
        Visibility::Private => relations.has_participant_history,
    }
}

fn in_course(actor: &Actor, room: &RoomRow, relations: &RoomRelations) -> bool {
    relations.community_member
        || room
            .community_id
            .is_some_and(|community| actor.is_affiliated_with(community))
}

/// Visibility-specific admission check for join.
///
/// Does not look at the room state; see [`check_state_for_join`].
pub fn check_access(
    actor: &Actor,
    room: &RoomRow,
    relations: &RoomRelations,
    credentials: &JoinCredentials,
) -> Result<(), RoomError> {
    if can_manage(actor, room, relations) {
        return Ok(());
    }

    match room.visibility {
        Visibility::Public => {
            if relations.blocked_with_creator {
                // Same answer as a room that does not exist
                return Err(RoomError::NotFound("Room not found".to_string()));
            }
            Ok(())
        }
        Visibility::CourseExclusive => {
            if in_course(actor, room, relations) {
                Ok(())
            } else {
                Err(RoomError::Forbidden(
                    "This room is limited to members of its course".to_string(),
                ))
            }
        }
        Visibility::Private => {
            if credentials.invite_valid {
                return Ok(());
            }
            match credentials.password {
                PasswordCheck::Matched => Ok(()),
                PasswordCheck::Mismatch => {
                    Err(RoomError::Forbidden("Incorrect room password".to_string()))
                }
                PasswordCheck::Missing => Err(RoomError::Forbidden(
                    "This room requires an invite or its password".to_string(),
                )),
                // No password configured: the password gate is open, but a
                // private room still needs an invite
                PasswordCheck::NotRequired => Err(RoomError::Forbidden(
                    "This room requires an invite".to_string(),
                )),
            }
        }
    }
}

/// State gate for join, evaluated on the locked room.
pub fn check_state_for_join(state: RoomState, is_manager: bool) -> Result<StateGate, RoomError> {
    match state {
        RoomState::Live => Ok(StateGate::Live),
        RoomState::Scheduled if is_manager => Ok(StateGate::ImplicitStart),
        RoomState::Scheduled => Err(RoomError::Conflict(
            "Room has not started yet".to_string(),
        )),
        RoomState::Ended => Err(RoomError::Conflict("Room has ended".to_string())),
        RoomState::Canceled => Err(RoomError::Conflict("Room was canceled".to_string())),
    }
}

/// Role given to `actor` on join.
pub fn participant_role(actor: &Actor, room: &RoomRow, is_manager: bool) -> ParticipantRole {
    if room.created_by == actor.user_id {
        ParticipantRole::Host
    } else if is_manager {
        ParticipantRole::CoHost
    } else {
        ParticipantRole::Participant
    }
}
