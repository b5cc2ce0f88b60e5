//! Meeting code generation and allocation.
//!
//! Codes are 8 characters over a 32-symbol alphabet of upper-case letters
//! and digits with the ambiguous `I`, `O`, `0` and `1` removed. Each
//! character takes the low 5 bits of one CSPRNG byte, so the mapping has no
//! modulo bias. Uniqueness is enforced by the `rooms.meet_code` constraint;
//! allocation retries on conflict.

use crate::errors::RoomError;
use crate::models::{RoomSettings, RoomState};
use crate::observability::metrics;
use crate::repositories::RoomsRepository;
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use sqlx::PgConnection;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Meet code alphabet (32 symbols).
pub const MEET_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Meet code length in characters (40 bits of entropy).
pub const MEET_CODE_LENGTH: usize = 8;

/// Attempts before allocation gives up with `ExhaustedRetries`.
pub const MAX_CODE_ATTEMPTS: u32 = 24;

/// Generate a random meet code.
pub fn generate_meet_code() -> Result<String, RoomError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; MEET_CODE_LENGTH];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "rooms.meet_code", error = %e, "Failed to generate random bytes for meet code");
        RoomError::Internal("RNG failure".to_string())
    })?;

    let mut code = String::with_capacity(MEET_CODE_LENGTH);
    for b in bytes {
        let ch = MEET_CODE_ALPHABET
            .get(usize::from(b & 0x1F))
            .ok_or_else(|| RoomError::Internal("Meet code index out of range".to_string()))?;
        code.push(char::from(*ch));
    }
    Ok(code)
}

/// Upper-case a code taken from user input and check its shape.
///
/// Returns `None` for anything that can never be a valid code, so callers can
/// answer `NotFound` without touching the store.
pub fn normalize_meet_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    is_valid_meet_code(&code).then_some(code)
}

pub fn is_valid_meet_code(code: &str) -> bool {
    code.len() == MEET_CODE_LENGTH && code.bytes().all(|b| MEET_CODE_ALPHABET.contains(&b))
}

/// Insert a room under a freshly generated code, retrying on collision.
///
/// Runs on the caller's transaction. Returns the new room id and its code.
pub async fn insert_room_with_fresh_code(
    conn: &mut PgConnection,
    created_by: Uuid,
    settings: &RoomSettings,
    state: RoomState,
    started_at: Option<DateTime<Utc>>,
    source_request_id: Option<Uuid>,
) -> Result<(Uuid, String), RoomError> {
    insert_room_with_codes(
        conn,
        generate_meet_code,
        created_by,
        settings,
        state,
        started_at,
        source_request_id,
    )
    .await
}

/// Allocation loop with an injectable code source.
#[instrument(skip_all, name = "rooms.meet_code.allocate")]
pub async fn insert_room_with_codes<G>(
    conn: &mut PgConnection,
    mut next_code: G,
    created_by: Uuid,
    settings: &RoomSettings,
    state: RoomState,
    started_at: Option<DateTime<Utc>>,
    source_request_id: Option<Uuid>,
) -> Result<(Uuid, String), RoomError>
where
    G: FnMut() -> Result<String, RoomError>,
{
    let mut collisions = 0u32;

    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = next_code()?;
        let inserted = RoomsRepository::try_insert(
            &mut *conn,
            &code,
            created_by,
            settings,
            state,
            started_at,
            source_request_id,
        )
        .await?;

        if let Some(room_id) = inserted {
            metrics::record_meet_code_collisions(collisions);
            return Ok((room_id, code));
        }

        collisions += 1;
        warn!(target: "rooms.meet_code", attempt = collisions, "Meet code collision, retrying");
    }

    metrics::record_meet_code_collisions(collisions);
    tracing::error!(
        target: "rooms.meet_code",
        attempts = MAX_CODE_ATTEMPTS,
        "Failed to allocate a unique meet code"
    );
    Err(RoomError::ExhaustedRetries)
}
