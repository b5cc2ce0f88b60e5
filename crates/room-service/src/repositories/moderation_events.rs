//! Moderation events repository. Append-only.

use super::observe;
use crate::errors::RoomError;
use crate::models::ModerationEvent;
use sqlx::PgExecutor;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

pub struct ModerationEventsRepository;

impl ModerationEventsRepository {
    #[instrument(skip_all, name = "rooms.repo.append_event", fields(action = event.action.as_str()))]
    pub async fn append<'e, E>(executor: E, event: &ModerationEvent) -> Result<(), RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO room_moderation_events
                (room_id, request_id, actor_id, target_user_id, action, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.room_id)
        .bind(event.request_id)
        .bind(event.actor_id)
        .bind(event.target_user_id)
        .bind(event.action.as_str())
        .bind(&event.metadata)
        .execute(executor)
        .await;
        observe("append_moderation_event", start, result).map(|_| ())
    }

    /// Number of events with `action` recorded for a room.
    #[instrument(skip_all, name = "rooms.repo.count_events")]
    pub async fn count_for_room<'e, E>(
        executor: E,
        room_id: Uuid,
        action: &str,
    ) -> Result<i64, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM room_moderation_events WHERE room_id = $1 AND action = $2",
        )
        .bind(room_id)
        .bind(action)
        .fetch_one(executor)
        .await;
        observe("count_moderation_events", start, count)
    }
}
