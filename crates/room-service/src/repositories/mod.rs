//! Room store repositories.
//!
//! One unit struct per table. Every function takes a `PgExecutor`, so the
//! same query runs against the pool for reads and against an open
//! transaction (`&mut *tx`) for the locked sections of the lifecycle
//! controller. Each query records `room_db_query_duration_seconds` and
//! `room_db_queries_total`.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Password hashes are loaded only where admission needs them
//! - Invite and session token digests are never returned to callers

pub mod moderation_events;
pub mod room_invites;
pub mod room_participants;
pub mod room_requests;
pub mod rooms;

pub use moderation_events::ModerationEventsRepository;
pub use room_invites::RoomInvitesRepository;
pub use room_participants::RoomParticipantsRepository;
pub use room_requests::RoomRequestsRepository;
pub use rooms::RoomsRepository;

use crate::errors::RoomError;
use crate::observability::metrics;
use std::time::Instant;

/// Record query metrics and map the sqlx error.
pub(crate) fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, RoomError> {
    let duration = start.elapsed();
    match result {
        Ok(value) => {
            metrics::record_db_query(operation, "success", duration);
            Ok(value)
        }
        Err(e) => {
            metrics::record_db_query(operation, "error", duration);
            Err(RoomError::Database(e.to_string()))
        }
    }
}

/// Decode a text column into one of the domain enums.
pub(crate) fn decode_enum<T>(
    column: &'static str,
    value: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, RoomError> {
    parse(value).ok_or_else(|| {
        RoomError::Database(format!("unexpected value '{value}' in column {column}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::RoomState;

    #[test]
    fn test_decode_enum_known_value() {
        let state = decode_enum("state", "live", RoomState::from_db_str).unwrap();
        assert_eq!(state, RoomState::Live);
    }

    #[test]
    fn test_decode_enum_unknown_value_is_database_error() {
        let err = decode_enum("state", "pending_approval", RoomState::from_db_str).unwrap_err();
        assert!(matches!(err, RoomError::Database(msg) if msg.contains("pending_approval")));
    }

    #[test]
    fn test_observe_maps_errors() {
        let result: Result<(), RoomError> =
            observe("test_op", Instant::now(), Err(sqlx::Error::RowNotFound));
        assert!(matches!(result, Err(RoomError::Database(_))));

        let ok = observe("test_op", Instant::now(), Ok::<_, sqlx::Error>(7)).unwrap();
        assert_eq!(ok, 7);
    }
}
