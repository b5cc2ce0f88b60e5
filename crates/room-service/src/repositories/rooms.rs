//! Rooms repository.
//!
//! Room rows are always read joined with the creator's display name and the
//! current count of active participants. The locking read (`lock_by_id`)
//! takes `FOR UPDATE OF r`, which is what serializes concurrent joins,
//! starts and ends on the same room.

use super::{decode_enum, observe};
use crate::errors::RoomError;
use crate::models::{RoomRow, RoomSettings, RoomState, Visibility};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const ROOM_SELECT: &str = r#"
    SELECT
        r.room_id, r.meet_code, r.name, r.created_by,
        u.display_name AS creator_display_name,
        r.visibility, r.community_id, r.max_participants,
        r.allow_mic, r.allow_video, r.allow_screen_share,
        r.password_hash, r.state, r.scheduled_at, r.started_at, r.ended_at,
        r.source_request_id, r.created_at, r.updated_at,
        (
            SELECT COUNT(*) FROM room_participants p
            WHERE p.room_id = r.room_id AND p.status = 'active'
        ) AS active_participants
    FROM rooms r
    LEFT JOIN users u ON u.user_id = r.created_by
"#;

/// Visibility-aware filter for room listings.
///
/// The SQL predicate mirrors the admission policy's view rules so that
/// `LIMIT` applies to rooms the viewer can actually see.
#[derive(Debug, Clone, Default)]
pub struct RoomListFilter {
    pub viewer_id: Uuid,
    pub viewer_is_platform_manager: bool,
    /// Communities the viewer belongs to or is course-affiliated with.
    pub communities: Vec<Uuid>,
    /// Communities the viewer moderates.
    pub moderated: Vec<Uuid>,
    /// Users the viewer is blocked with in either direction.
    pub blocked: Vec<Uuid>,
    pub search: Option<String>,
    pub state: Option<RoomState>,
    pub include_closed: bool,
    pub limit: i64,
}

pub struct RoomsRepository;

impl RoomsRepository {
    #[instrument(skip_all, name = "rooms.repo.find_room_by_code")]
    pub async fn find_by_code<'e, E>(
        executor: E,
        meet_code: &str,
    ) -> Result<Option<RoomRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!("{ROOM_SELECT} WHERE r.meet_code = $1");
        let row = sqlx::query(&sql)
            .bind(meet_code)
            .fetch_optional(executor)
            .await;
        observe("find_room_by_code", start, row)?
            .map(|r| map_room_row(&r))
            .transpose()
    }

    #[instrument(skip_all, name = "rooms.repo.find_room_by_id")]
    pub async fn find_by_id<'e, E>(executor: E, room_id: Uuid) -> Result<Option<RoomRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!("{ROOM_SELECT} WHERE r.room_id = $1");
        let row = sqlx::query(&sql)
            .bind(room_id)
            .fetch_optional(executor)
            .await;
        observe("find_room_by_id", start, row)?
            .map(|r| map_room_row(&r))
            .transpose()
    }

    /// Lock the room row for the rest of the transaction.
    ///
    /// `active_participants` in the returned row may predate the lock; callers
    /// that enforce capacity must recount with
    /// `RoomParticipantsRepository::count_active` after this returns.
    #[instrument(skip_all, name = "rooms.repo.lock_room")]
    pub async fn lock_by_id<'e, E>(executor: E, room_id: Uuid) -> Result<Option<RoomRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!("{ROOM_SELECT} WHERE r.room_id = $1 FOR UPDATE OF r");
        let row = sqlx::query(&sql)
            .bind(room_id)
            .fetch_optional(executor)
            .await;
        observe("lock_room", start, row)?
            .map(|r| map_room_row(&r))
            .transpose()
    }

    /// Insert a room under `meet_code`.
    ///
    /// Returns `None` when the code is already taken; the caller draws a new
    /// code and retries.
    #[instrument(skip_all, name = "rooms.repo.insert_room", fields(meet_code = %meet_code))]
    pub async fn try_insert<'e, E>(
        executor: E,
        meet_code: &str,
        created_by: Uuid,
        settings: &RoomSettings,
        state: RoomState,
        started_at: Option<DateTime<Utc>>,
        source_request_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            INSERT INTO rooms (
                meet_code, name, created_by, visibility, community_id,
                max_participants, allow_mic, allow_video, allow_screen_share,
                password_hash, state, scheduled_at, started_at, source_request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (meet_code) DO NOTHING
            RETURNING room_id
            "#,
        )
        .bind(meet_code) // $1
        .bind(&settings.name) // $2
        .bind(created_by) // $3
        .bind(settings.visibility.as_str()) // $4
        .bind(settings.room_community_id()) // $5
        .bind(settings.max_participants) // $6
        .bind(settings.allow_mic) // $7
        .bind(settings.allow_video) // $8
        .bind(settings.allow_screen_share) // $9
        .bind(settings.password_hash.as_deref()) // $10
        .bind(state.as_str()) // $11
        .bind(settings.scheduled_at) // $12
        .bind(started_at) // $13
        .bind(source_request_id) // $14
        .fetch_optional(executor)
        .await;

        observe("insert_room", start, row)?
            .map(|r| r.try_get::<Uuid, _>("room_id"))
            .transpose()
            .map_err(RoomError::from)
    }

    /// `scheduled -> live`. Returns false if the room was not scheduled.
    #[instrument(skip_all, name = "rooms.repo.mark_live")]
    pub async fn mark_live<'e, E>(
        executor: E,
        room_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET state = 'live', started_at = COALESCE(started_at, $2), updated_at = NOW()
            WHERE room_id = $1 AND state = 'scheduled'
            "#,
        )
        .bind(room_id)
        .bind(now)
        .execute(executor)
        .await;
        Ok(observe("mark_room_live", start, result)?.rows_affected() == 1)
    }

    /// `live -> ended`. Returns false if the room was not live.
    #[instrument(skip_all, name = "rooms.repo.mark_ended")]
    pub async fn mark_ended<'e, E>(
        executor: E,
        room_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET state = 'ended', ended_at = $2, updated_at = NOW()
            WHERE room_id = $1 AND state = 'live'
            "#,
        )
        .bind(room_id)
        .bind(now)
        .execute(executor)
        .await;
        Ok(observe("mark_room_ended", start, result)?.rows_affected() == 1)
    }

    /// `scheduled | live -> canceled`. Returns false for closed rooms.
    #[instrument(skip_all, name = "rooms.repo.mark_canceled")]
    pub async fn mark_canceled<'e, E>(
        executor: E,
        room_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET state = 'canceled', ended_at = $2, updated_at = NOW()
            WHERE room_id = $1 AND state IN ('scheduled', 'live')
            "#,
        )
        .bind(room_id)
        .bind(now)
        .execute(executor)
        .await;
        Ok(observe("mark_room_canceled", start, result)?.rows_affected() == 1)
    }

    /// Rooms visible to the viewer described by `filter`, newest activity first.
    #[instrument(skip_all, name = "rooms.repo.list_rooms")]
    pub async fn list<'e, E>(executor: E, filter: &RoomListFilter) -> Result<Vec<RoomRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            r#"{ROOM_SELECT}
            WHERE ($2 OR $3::text IS NOT NULL OR r.state IN ('scheduled', 'live'))
              AND ($3::text IS NULL OR r.state = $3)
              AND ($4::text IS NULL OR r.name ILIKE $4 ESCAPE '\')
              AND (
                    $5
                 OR r.created_by = $1
                 OR r.community_id = ANY($7)
                 OR (r.visibility = 'public' AND NOT (r.created_by = ANY($8)))
                 OR (r.visibility = 'course_exclusive' AND r.community_id = ANY($6))
                 OR (r.visibility <> 'public' AND EXISTS (
                        SELECT 1 FROM room_participants vp
                        WHERE vp.room_id = r.room_id AND vp.user_id = $1
                    ))
              )
            ORDER BY COALESCE(r.started_at, r.scheduled_at, r.created_at) DESC, r.room_id
            LIMIT $9
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.viewer_id) // $1
            .bind(filter.include_closed) // $2
            .bind(filter.state.map(|s| s.as_str())) // $3
            .bind(filter.search.as_deref().map(like_pattern)) // $4
            .bind(filter.viewer_is_platform_manager) // $5
            .bind(&filter.communities) // $6
            .bind(&filter.moderated) // $7
            .bind(&filter.blocked) // $8
            .bind(filter.limit) // $9
            .fetch_all(executor)
            .await;

        observe("list_rooms", start, rows)?
            .iter()
            .map(map_room_row)
            .collect()
    }
}

/// `%term%` with LIKE metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn map_room_row(row: &PgRow) -> Result<RoomRow, RoomError> {
    let visibility: String = row.try_get("visibility")?;
    let state: String = row.try_get("state")?;

    Ok(RoomRow {
        room_id: row.try_get("room_id")?,
        meet_code: row.try_get("meet_code")?,
        name: row.try_get("name")?,
        created_by: row.try_get("created_by")?,
        creator_display_name: row.try_get("creator_display_name")?,
        visibility: decode_enum("visibility", &visibility, Visibility::from_db_str)?,
        community_id: row.try_get("community_id")?,
        max_participants: row.try_get("max_participants")?,
        allow_mic: row.try_get("allow_mic")?,
        allow_video: row.try_get("allow_video")?,
        allow_screen_share: row.try_get("allow_screen_share")?,
        password_hash: row.try_get("password_hash")?,
        state: decode_enum("state", &state, RoomState::from_db_str)?,
        scheduled_at: row.try_get("scheduled_at")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        source_request_id: row.try_get("source_request_id")?,
        active_participants: row.try_get("active_participants")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("study"), "%study%");
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
        assert_eq!(like_pattern("c:\\"), "%c:\\\\%");
    }
}
