//! Direct creation and host control integration tests.
//!
//! Create, scheduled rooms, start/end/cancel transitions, listing, and the
//! collaborator failure modes (audit sink down, rate limit hit).

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chrono::{Duration, Utc};
use room_service::errors::RoomError;
use room_service::models::{
    CreateRoomRequest, JoinRoomRequest, ListRoomsQuery, ParticipantRole, RoomState, Visibility,
};
use room_service::services::audit::mock::{FailingAuditSink, StalledAuditSink};
use room_service::services::meet_code::is_valid_meet_code;
use room_service::services::rate_limiter::mock::DenyAll;
use room_test_utils::*;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

fn body(value: serde_json::Value) -> CreateRoomRequest {
    serde_json::from_value(value).expect("room body should deserialize")
}

// ============================================================================
// Create
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_admin_creates_live_public_room(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;

    let created = lifecycle
        .create(&admin.actor, body(json!({"name": "Town Hall", "visibility": "public"})))
        .await?;
    let room = &created.room;

    assert!(is_valid_meet_code(&room.code), "bad code {}", room.code);
    assert_eq!(room.state, RoomState::Live);
    assert!(room.started_at.is_some());
    assert_eq!(room.visibility, Visibility::Public);
    assert_eq!(room.max_participants, 10);
    assert!(room.features.mic && room.features.video && room.features.screen_share);
    assert!(room.can_manage);
    assert!(created.invite_token.is_none());
    assert_eq!(created.join_url, format!("{TEST_CALL_BASE_URL}/{}", room.code));
    assert_eq!(count_events(&lifecycle, room.id, "create_room").await, 1);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_meet_codes_are_unique(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;

    let mut codes = std::collections::HashSet::new();
    for i in 0..20 {
        let created = lifecycle
            .create(
                &admin.actor,
                body(json!({"name": format!("Room {i}"), "visibility": "public"})),
            )
            .await?;
        assert!(codes.insert(created.room.code));
    }
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_moderator_creates_private_room_in_own_community(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let club = seed_community(&pool, "Chess Club", false).await;
    let moderator = seed_member(&pool, "Mo").await;
    add_member(&pool, club, &moderator, "moderator").await;

    let created = lifecycle
        .create(
            &moderator.actor,
            body(json!({"name": "Strategy Night", "visibility": "private", "community_id": club})),
        )
        .await?;
    assert_eq!(created.room.visibility, Visibility::Private);
    // Private rooms are not stored against a community
    assert!(created.room.community_id.is_none());
    assert!(created.invite_token.is_some());

    // Moderators may not create public rooms
    let public = lifecycle
        .create(
            &moderator.actor,
            body(json!({"name": "Open Chess", "visibility": "public"})),
        )
        .await;
    assert!(matches!(public, Err(RoomError::Forbidden(_))));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_invalid_bodies_are_rejected(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;

    for invalid in [
        json!({"name": "  ", "visibility": "public"}),
        json!({"name": "Too Big", "visibility": "public", "max_participants": 100}),
        json!({"name": "Too Small", "visibility": "public", "max_participants": 1}),
        json!({"name": "Locked", "visibility": "public", "password": "open-sesame"}),
        json!({"name": "Course", "visibility": "course_exclusive"}),
        json!({"name": "Past", "visibility": "public", "scheduled_at": Utc::now() - Duration::hours(1)}),
    ] {
        let result = lifecycle.create(&admin.actor, body(invalid.clone())).await;
        assert!(
            matches!(result, Err(RoomError::Validation(_))),
            "{invalid} should be rejected"
        );
    }
    Ok(())
}

// ============================================================================
// Scheduled rooms and transitions
// ============================================================================

/// A scheduled room: members wait, the host's join starts it, members get in.
#[sqlx::test(migrations = "../../migrations")]
async fn test_scheduled_room_starts_when_host_joins(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;
    let member = seed_member(&pool, "Sam").await;

    let created = lifecycle
        .create(
            &admin.actor,
            body(json!({
                "name": "Friday Seminar",
                "visibility": "public",
                "scheduled_at": Utc::now() + Duration::hours(2),
            })),
        )
        .await?;
    let code = created.room.code.clone();
    assert_eq!(created.room.state, RoomState::Scheduled);
    assert!(created.room.started_at.is_none());

    let early = lifecycle.join(&member.actor, &code, JoinRoomRequest::default()).await;
    assert!(matches!(early, Err(RoomError::Conflict(msg)) if msg == "Room has not started yet"));

    let hosted = lifecycle.join(&admin.actor, &code, JoinRoomRequest::default()).await?;
    assert_eq!(hosted.role, ParticipantRole::Host);
    assert_eq!(hosted.room.state, RoomState::Live);
    assert!(hosted.room.started_at.is_some());
    assert_eq!(count_events(&lifecycle, created.room.id, "start_room").await, 1);

    let joined = lifecycle.join(&member.actor, &code, JoinRoomRequest::default()).await?;
    assert_eq!(joined.room.active_participants, 2);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_start_is_idempotent(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;

    let created = lifecycle
        .create(
            &admin.actor,
            body(json!({
                "name": "Planning",
                "visibility": "public",
                "scheduled_at": Utc::now() + Duration::days(1),
            })),
        )
        .await?;
    let code = created.room.code;

    let started = lifecycle.start(&admin.actor, &code).await?;
    assert_eq!(started.state, RoomState::Live);
    let again = lifecycle.start(&admin.actor, &code).await?;
    assert_eq!(again.state, RoomState::Live);
    assert_eq!(count_events(&lifecycle, started.id, "start_room").await, 1);
    Ok(())
}

/// Ending twice succeeds but records a single end event.
#[sqlx::test(migrations = "../../migrations")]
async fn test_end_is_idempotent_and_closes_participants(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;
    let member = seed_member(&pool, "Sam").await;

    let room = lifecycle
        .create(&admin.actor, body(json!({"name": "Standup", "visibility": "public"})))
        .await?
        .room;
    lifecycle.join(&admin.actor, &room.code, JoinRoomRequest::default()).await?;
    lifecycle.join(&member.actor, &room.code, JoinRoomRequest::default()).await?;

    let ended = lifecycle.end(&admin.actor, &room.code).await?;
    assert_eq!(ended.state, RoomState::Ended);
    assert!(ended.ended_at.is_some());
    assert_eq!(ended.active_participants, 0);
    assert_eq!(
        participant_status(&pool, room.id, admin.id()).await.as_deref(),
        Some("left")
    );
    assert_eq!(
        participant_status(&pool, room.id, member.id()).await.as_deref(),
        Some("kicked")
    );

    let again = lifecycle.end(&admin.actor, &room.code).await?;
    assert_eq!(again.state, RoomState::Ended);
    assert_eq!(again.ended_at, ended.ended_at);
    assert_eq!(count_events(&lifecycle, room.id, "end_room").await, 1);

    let cancel = lifecycle.cancel(&admin.actor, &room.code).await;
    assert!(matches!(cancel, Err(RoomError::Conflict(_))));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_scheduled_room_cannot_end_but_can_be_canceled(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;
    let member = seed_member(&pool, "Sam").await;

    let room = lifecycle
        .create(
            &admin.actor,
            body(json!({
                "name": "Retro",
                "visibility": "public",
                "scheduled_at": Utc::now() + Duration::hours(3),
            })),
        )
        .await?
        .room;

    let end = lifecycle.end(&admin.actor, &room.code).await;
    assert!(matches!(end, Err(RoomError::Conflict(_))));

    let canceled = lifecycle.cancel(&admin.actor, &room.code).await?;
    assert_eq!(canceled.state, RoomState::Canceled);
    lifecycle.cancel(&admin.actor, &room.code).await?;
    assert_eq!(count_events(&lifecycle, room.id, "cancel_room").await, 1);

    let join = lifecycle.join(&member.actor, &room.code, JoinRoomRequest::default()).await;
    assert!(matches!(join, Err(RoomError::Conflict(msg)) if msg == "Room was canceled"));
    let start = lifecycle.start(&admin.actor, &room.code).await;
    assert!(matches!(start, Err(RoomError::Conflict(_))));
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_only_managers_drive_transitions(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;
    let member = seed_member(&pool, "Sam").await;

    let public = lifecycle
        .create(&admin.actor, body(json!({"name": "Lobby", "visibility": "public"})))
        .await?
        .room;
    let private = lifecycle
        .create(&admin.actor, body(json!({"name": "Backroom", "visibility": "private"})))
        .await?
        .room;

    let visible = lifecycle.end(&member.actor, &public.code).await;
    assert!(matches!(visible, Err(RoomError::Forbidden(_))));

    let invisible = lifecycle.end(&member.actor, &private.code).await;
    assert!(matches!(invisible, Err(RoomError::NotFound(_))));

    // Another admin manages every room
    let other_admin = seed_admin(&pool, "Grace").await;
    let joined = lifecycle
        .join(&other_admin.actor, &public.code, JoinRoomRequest::default())
        .await?;
    assert_eq!(joined.role, ParticipantRole::CoHost);
    lifecycle.end(&other_admin.actor, &public.code).await?;
    Ok(())
}

// ============================================================================
// Listing
// ============================================================================

#[sqlx::test(migrations = "../../migrations")]
async fn test_list_rooms_filters_by_visibility_search_and_state(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let lifecycle = test_lifecycle(&pool);
    let admin = seed_admin(&pool, "Ada").await;
    let member = seed_member(&pool, "Sam").await;

    let algebra = lifecycle
        .create(&admin.actor, body(json!({"name": "Algebra Help", "visibility": "public"})))
        .await?
        .room;
    let history = lifecycle
        .create(&admin.actor, body(json!({"name": "History Club", "visibility": "public"})))
        .await?
        .room;
    let secret = lifecycle
        .create(&admin.actor, body(json!({"name": "Algebra Secret", "visibility": "private"})))
        .await?
        .room;
    lifecycle.end(&admin.actor, &history.code).await?;

    let visible = lifecycle.list_rooms(&member.actor, &ListRoomsQuery::default()).await?;
    let ids: Vec<_> = visible.iter().map(|r| r.id).collect();
    assert!(ids.contains(&algebra.id));
    assert!(!ids.contains(&history.id), "closed rooms are hidden by default");
    assert!(!ids.contains(&secret.id), "private rooms are hidden from outsiders");

    let searched = lifecycle
        .list_rooms(
            &member.actor,
            &ListRoomsQuery {
                q: Some("algebra".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(searched.len(), 1);
    assert_eq!(searched[0].id, algebra.id);

    let closed = lifecycle
        .list_rooms(
            &member.actor,
            &ListRoomsQuery {
                state: Some(RoomState::Ended),
                include_closed: Some(true),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].id, history.id);

    // Naming a closed state is enough to see closed rooms
    let ended_only = lifecycle
        .list_rooms(
            &member.actor,
            &ListRoomsQuery {
                state: Some(RoomState::Ended),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(ended_only.len(), 1);
    assert_eq!(ended_only[0].id, history.id);

    let live_only = lifecycle
        .list_rooms(
            &member.actor,
            &ListRoomsQuery {
                state: Some(RoomState::Live),
                include_closed: Some(true),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(live_only.len(), 1);
    assert_eq!(live_only[0].id, algebra.id);

    let as_admin = lifecycle
        .list_rooms(
            &admin.actor,
            &ListRoomsQuery {
                q: Some("algebra".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(as_admin.len(), 2);
    assert!(as_admin.iter().all(|r| r.can_manage));
    Ok(())
}

// ============================================================================
// Collaborator failures
// ============================================================================

/// Audit failures never fail the operation that produced the event.
#[sqlx::test(migrations = "../../migrations")]
async fn test_audit_failure_does_not_fail_operation(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = TestLifecycle::new(&pool)
        .audit(Arc::new(FailingAuditSink))
        .build();
    let admin = seed_admin(&pool, "Ada").await;

    let room = lifecycle
        .create(&admin.actor, body(json!({"name": "Quiet", "visibility": "public"})))
        .await?
        .room;
    lifecycle.end(&admin.actor, &room.code).await?;
    assert_eq!(count_events(&lifecycle, room.id, "create_room").await, 0);
    Ok(())
}

/// A sink that never answers must not hold up a committed operation.
#[sqlx::test(migrations = "../../migrations")]
async fn test_stalled_audit_sink_does_not_delay_operations(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let lifecycle = TestLifecycle::new(&pool)
        .audit(Arc::new(StalledAuditSink))
        .build();
    let admin = seed_admin(&pool, "Ada").await;

    let created = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        lifecycle.create(&admin.actor, body(json!({"name": "Busy Hall", "visibility": "public"}))),
    )
    .await
    .expect("create should not wait on the audit sink")?;

    let ended = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        lifecycle.end(&admin.actor, &created.room.code),
    )
    .await
    .expect("end should not wait on the audit sink")?;
    assert_eq!(ended.state, RoomState::Ended);

    let rooms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
        .fetch_one(&pool)
        .await?;
    assert_eq!(rooms, 1);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_rate_limited_actor_is_refused(pool: PgPool) -> Result<(), anyhow::Error> {
    let lifecycle = TestLifecycle::new(&pool)
        .rate_limiter(Arc::new(DenyAll))
        .build();
    let admin = seed_admin(&pool, "Ada").await;

    let result = lifecycle
        .create(&admin.actor, body(json!({"name": "Busy", "visibility": "public"})))
        .await;
    assert!(matches!(result, Err(RoomError::RateLimitExceeded)));

    let rooms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
        .fetch_one(&pool)
        .await?;
    assert_eq!(rooms, 0);
    Ok(())
}
