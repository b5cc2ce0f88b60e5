//! Read-only views: get, list and search rooms, list requests, roster.

use super::{record_outcome, RoomLifecycle};
use crate::errors::RoomError;
use crate::models::{
    Actor, ListRequestsQuery, ListRoomsQuery, ParticipantResponse, ParticipantStatus,
    RequestStatus, RoomRequestResponse, RoomResponse,
};
use crate::repositories::room_requests::RequestListFilter;
use crate::repositories::rooms::RoomListFilter;
use crate::repositories::{RoomParticipantsRepository, RoomRequestsRepository, RoomsRepository};
use crate::services::admission::{self, RoomRelations};
use std::collections::HashSet;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

impl RoomLifecycle {
    /// A room the caller can see. Invisible rooms are not found.
    #[instrument(skip_all, name = "rooms.lifecycle.get_room", fields(meet_code = %code))]
    pub async fn get_room(&self, actor: &Actor, code: &str) -> Result<RoomResponse, RoomError> {
        let room = self.find_room(code).await?;
        let relations = self.relations_for(actor, &room).await?;
        if !admission::can_view(actor, &room, &relations) {
            return Err(super::room_not_found());
        }
        Ok(RoomResponse::from_row(
            &room,
            admission::can_manage(actor, &room, &relations),
        ))
    }

    /// Rooms visible to the caller, optionally filtered by name and state.
    ///
    /// Closed rooms are excluded unless `include_closed` is set or `state`
    /// names a state explicitly.
    #[instrument(skip_all, name = "rooms.lifecycle.list_rooms", fields(user_id = %actor.user_id))]
    pub async fn list_rooms(
        &self,
        actor: &Actor,
        query: &ListRoomsQuery,
    ) -> Result<Vec<RoomResponse>, RoomError> {
        let start = Instant::now();
        let result = self.list_rooms_inner(actor, query).await;
        record_outcome("list_rooms", start, &result);
        result
    }

    async fn list_rooms_inner(
        &self,
        actor: &Actor,
        query: &ListRoomsQuery,
    ) -> Result<Vec<RoomResponse>, RoomError> {
        let members: HashSet<Uuid> = self
            .directory
            .member_communities(actor.user_id)
            .await?
            .into_iter()
            .collect();
        let moderated: HashSet<Uuid> = self
            .directory
            .moderated_communities(actor.user_id)
            .await?
            .into_iter()
            .collect();
        let blocked: HashSet<Uuid> = self
            .blocks
            .blocked_peers(actor.user_id)
            .await?
            .into_iter()
            .collect();

        let communities: Vec<Uuid> = members
            .iter()
            .chain(actor.course_affiliations.iter())
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let filter = RoomListFilter {
            viewer_id: actor.user_id,
            viewer_is_platform_manager: actor.is_platform_manager(),
            communities,
            moderated: moderated.iter().copied().collect(),
            blocked: blocked.iter().copied().collect(),
            search: query.search().map(str::to_string),
            state: query.state,
            include_closed: query.include_closed.unwrap_or(false),
            limit: query.effective_limit(),
        };
        let rows = RoomsRepository::list(&self.pool, &filter).await?;

        let room_ids: Vec<Uuid> = rows.iter().map(|r| r.room_id).collect();
        let history =
            RoomParticipantsRepository::rooms_with_history(&self.pool, actor.user_id, &room_ids)
                .await?;

        Ok(rows
            .iter()
            .filter_map(|room| {
                let relations = RoomRelations {
                    community_member: room.community_id.is_some_and(|c| members.contains(&c)),
                    community_moderator: room.community_id.is_some_and(|c| moderated.contains(&c)),
                    blocked_with_creator: room.created_by != actor.user_id
                        && blocked.contains(&room.created_by),
                    has_participant_history: history.contains(&room.room_id),
                };
                admission::can_view(actor, room, &relations).then(|| {
                    RoomResponse::from_row(room, admission::can_manage(actor, room, &relations))
                })
            })
            .collect())
    }

    /// Room requests in the caller's review scope, or the caller's own.
    ///
    /// Owners and admins see every request, community moderators see
    /// requests scoped to communities they moderate. `mine` restricts the
    /// listing to the caller's own requests.
    #[instrument(skip_all, name = "rooms.lifecycle.list_requests", fields(user_id = %actor.user_id))]
    pub async fn list_requests(
        &self,
        actor: &Actor,
        query: &ListRequestsQuery,
    ) -> Result<Vec<RoomRequestResponse>, RoomError> {
        self.sweeper.maybe_sweep(&self.pool).await;

        let status = query.status.unwrap_or(RequestStatus::Pending);
        let filter = if query.mine.unwrap_or(false) {
            RequestListFilter {
                status,
                requested_by: Some(actor.user_id),
                communities: None,
            }
        } else if actor.is_platform_manager() {
            RequestListFilter {
                status,
                requested_by: None,
                communities: None,
            }
        } else {
            RequestListFilter {
                status,
                requested_by: None,
                communities: Some(self.directory.moderated_communities(actor.user_id).await?),
            }
        };

        let rows = RoomRequestsRepository::list(&self.pool, &filter).await?;
        Ok(rows.iter().map(RoomRequestResponse::from).collect())
    }

    /// Active roster. Managers and active participants only.
    #[instrument(skip_all, name = "rooms.lifecycle.list_participants", fields(meet_code = %code))]
    pub async fn list_participants(
        &self,
        actor: &Actor,
        code: &str,
    ) -> Result<Vec<ParticipantResponse>, RoomError> {
        let room = self.find_room(code).await?;
        let relations = self.relations_for(actor, &room).await?;

        if !admission::can_manage(actor, &room, &relations) {
            if !admission::can_view(actor, &room, &relations) {
                return Err(super::room_not_found());
            }
            let own = RoomParticipantsRepository::find(&self.pool, room.room_id, actor.user_id)
                .await?;
            if !own.is_some_and(|p| p.status == ParticipantStatus::Active) {
                return Err(RoomError::Forbidden(
                    "Only participants can see who is in this room".to_string(),
                ));
            }
        }

        let roster = RoomParticipantsRepository::list_active(&self.pool, room.room_id).await?;
        Ok(roster.iter().map(ParticipantResponse::from).collect())
    }
}
