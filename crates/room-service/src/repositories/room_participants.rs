//! Room participants repository.
//!
//! One row per (room, user). Rows are soft-closed (`left`, `kicked`) and
//! never deleted. Capacity is enforced by the lifecycle controller with
//! `count_active` while it holds the room lock.

use super::{decode_enum, observe};
use crate::errors::RoomError;
use crate::models::{ParticipantRole, ParticipantRow, ParticipantStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use std::collections::HashSet;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const PARTICIPANT_COLUMNS: &str = r#"
    p.room_id, p.user_id, u.display_name, p.role, p.status,
    p.mic_on, p.video_on, p.screen_on, p.joined_at, p.left_at
"#;

pub struct RoomParticipantsRepository;

impl RoomParticipantsRepository {
    #[instrument(skip_all, name = "rooms.repo.find_participant")]
    pub async fn find<'e, E>(
        executor: E,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ParticipantRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM room_participants p \
             LEFT JOIN users u ON u.user_id = p.user_id \
             WHERE p.room_id = $1 AND p.user_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(executor)
            .await;
        observe("find_participant", start, row)?
            .map(|r| map_participant_row(&r))
            .transpose()
    }

    #[instrument(skip_all, name = "rooms.repo.count_active")]
    pub async fn count_active<'e, E>(executor: E, room_id: Uuid) -> Result<i64, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM room_participants WHERE room_id = $1 AND status = 'active'",
        )
        .bind(room_id)
        .fetch_one(executor)
        .await;
        observe("count_active_participants", start, count)
    }

    /// Insert or reactivate the caller's row with device toggles off.
    #[instrument(skip_all, name = "rooms.repo.activate_participant")]
    pub async fn activate<'e, E>(
        executor: E,
        room_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<(), RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO room_participants (room_id, user_id, role, status, joined_at)
            VALUES ($1, $2, $3, 'active', NOW())
            ON CONFLICT (room_id, user_id) DO UPDATE
            SET role = EXCLUDED.role,
                status = 'active',
                mic_on = false,
                video_on = false,
                screen_on = false,
                joined_at = NOW(),
                left_at = NULL
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(executor)
        .await;
        observe("activate_participant", start, result).map(|_| ())
    }

    /// `active -> left` for one user. Returns false if the user was not active.
    #[instrument(skip_all, name = "rooms.repo.leave")]
    pub async fn mark_left<'e, E>(
        executor: E,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        Self::close_one(executor, room_id, user_id, ParticipantStatus::Left).await
    }

    /// `active -> kicked` for one user. Returns false if the user was not active.
    #[instrument(skip_all, name = "rooms.repo.kick")]
    pub async fn mark_kicked<'e, E>(
        executor: E,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        Self::close_one(executor, room_id, user_id, ParticipantStatus::Kicked).await
    }

    async fn close_one<'e, E>(
        executor: E,
        room_id: Uuid,
        user_id: Uuid,
        status: ParticipantStatus,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_participants
            SET status = $3, left_at = NOW(), mic_on = false, video_on = false, screen_on = false
            WHERE room_id = $1 AND user_id = $2 AND status = 'active'
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(status.as_str())
        .execute(executor)
        .await;
        Ok(observe("close_participant", start, result)?.rows_affected() == 1)
    }

    /// Close every active row of a room.
    ///
    /// `closer` (the ending manager) becomes `left`; everyone else becomes
    /// `kicked`. Pass `None` to kick everyone.
    #[instrument(skip_all, name = "rooms.repo.close_all")]
    pub async fn close_all_active<'e, E>(
        executor: E,
        room_id: Uuid,
        closer: Option<Uuid>,
    ) -> Result<u64, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_participants
            SET status = CASE WHEN user_id = $2 THEN 'left' ELSE 'kicked' END,
                left_at = NOW(), mic_on = false, video_on = false, screen_on = false
            WHERE room_id = $1 AND status = 'active'
            "#,
        )
        .bind(room_id)
        .bind(closer)
        .execute(executor)
        .await;
        Ok(observe("close_all_participants", start, result)?.rows_affected())
    }

    #[instrument(skip_all, name = "rooms.repo.list_active")]
    pub async fn list_active<'e, E>(
        executor: E,
        room_id: Uuid,
    ) -> Result<Vec<ParticipantRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM room_participants p \
             LEFT JOIN users u ON u.user_id = p.user_id \
             WHERE p.room_id = $1 AND p.status = 'active' \
             ORDER BY p.joined_at, p.user_id"
        );
        let rows = sqlx::query(&sql).bind(room_id).fetch_all(executor).await;
        observe("list_active_participants", start, rows)?
            .iter()
            .map(map_participant_row)
            .collect()
    }

    /// Apply device toggles to the caller's active row. `None` leaves a toggle
    /// unchanged. Returns `None` if the caller is not active in the room.
    #[instrument(skip_all, name = "rooms.repo.update_media")]
    pub async fn update_media<'e, E>(
        executor: E,
        room_id: Uuid,
        user_id: Uuid,
        mic_on: Option<bool>,
        video_on: Option<bool>,
        screen_on: Option<bool>,
    ) -> Result<Option<ParticipantRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            r#"
            WITH p AS (
                UPDATE room_participants
                SET mic_on = COALESCE($3, mic_on),
                    video_on = COALESCE($4, video_on),
                    screen_on = COALESCE($5, screen_on)
                WHERE room_id = $1 AND user_id = $2 AND status = 'active'
                RETURNING *
            )
            SELECT {PARTICIPANT_COLUMNS}
            FROM p LEFT JOIN users u ON u.user_id = p.user_id
            "#
        );
        let row = sqlx::query(&sql)
            .bind(room_id)
            .bind(user_id)
            .bind(mic_on)
            .bind(video_on)
            .bind(screen_on)
            .fetch_optional(executor)
            .await;
        observe("update_media", start, row)?
            .map(|r| map_participant_row(&r))
            .transpose()
    }

    /// Which of `room_ids` the user has ever held a participant row in.
    #[instrument(skip_all, name = "rooms.repo.rooms_with_history")]
    pub async fn rooms_with_history<'e, E>(
        executor: E,
        user_id: Uuid,
        room_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        if room_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let start = Instant::now();
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT room_id FROM room_participants WHERE user_id = $1 AND room_id = ANY($2)",
        )
        .bind(user_id)
        .bind(room_ids)
        .fetch_all(executor)
        .await;
        Ok(observe("rooms_with_history", start, ids)?
            .into_iter()
            .collect())
    }
}

fn map_participant_row(row: &PgRow) -> Result<ParticipantRow, RoomError> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;

    Ok(ParticipantRow {
        room_id: row.try_get("room_id")?,
        user_id: row.try_get("user_id")?,
        display_name: row.try_get("display_name")?,
        role: decode_enum("role", &role, ParticipantRole::from_db_str)?,
        status: decode_enum("status", &status, ParticipantStatus::from_db_str)?,
        mic_on: row.try_get("mic_on")?,
        video_on: row.try_get("video_on")?,
        screen_on: row.try_get("screen_on")?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
    })
}
