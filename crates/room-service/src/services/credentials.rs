//! Room passwords and invite tokens.
//!
//! # Password hashes
//!
//! New hashes are Argon2id PHC strings
//! (`$argon2id$v=19$m=19456,t=2,p=1$<salt>$<hash>`), so algorithm, parameters
//! and salt travel with the digest. Legacy bcrypt strings (`$2a$`, `$2b$`,
//! `$2y$`) still verify. Anything unparseable never matches; verification
//! never errors.
//!
//! # Invites
//!
//! An invite token is 32 CSPRNG bytes, base64url-encoded. Only its SHA-256
//! digest is persisted; the raw token is handed out exactly once.

use crate::errors::RoomError;
use crate::models::InviteRow;
use crate::repositories::RoomInvitesRepository;
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::token::{generate_url_safe_token, token_digest, DEFAULT_TOKEN_BYTES};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use sqlx::PgExecutor;
use tracing::instrument;
use uuid::Uuid;

/// Longest invite token accepted from a caller before digesting.
const MAX_PRESENTED_TOKEN_LENGTH: usize = 256;

const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Hash a room password with Argon2id and a fresh random salt.
pub fn hash_password(plain: &SecretString) -> Result<String, RoomError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(target: "rooms.credentials", error = %e, "Password hashing failed");
            RoomError::Internal("Password hashing failed".to_string())
        })
}

/// Verify a password against a stored hash in constant time.
///
/// Malformed or unknown hash formats verify as `false`.
pub fn verify_password(plain: &SecretString, stored: &str) -> bool {
    let candidate = plain.expose_secret().as_bytes();

    if BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p)) {
        return bcrypt::verify(candidate, stored).unwrap_or(false);
    }

    if stored.starts_with("$argon2") {
        return match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(candidate, &parsed)
                .is_ok(),
            Err(_) => false,
        };
    }

    false
}

/// Outcome of checking a join attempt against a room's password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    /// The room has no password; nothing to check.
    NotRequired,
    /// The room has a password and none was supplied.
    Missing,
    Matched,
    Mismatch,
}

/// Check an optional supplied password against an optional stored hash.
pub fn check_room_password(stored: Option<&str>, supplied: Option<&SecretString>) -> PasswordCheck {
    match (stored, supplied) {
        (None, _) => PasswordCheck::NotRequired,
        (Some(_), None) => PasswordCheck::Missing,
        (Some(hash), Some(plain)) => {
            if verify_password(plain, hash) {
                PasswordCheck::Matched
            } else {
                PasswordCheck::Mismatch
            }
        }
    }
}

/// A freshly minted invite token and its digest.
#[derive(Debug)]
pub struct MintedInvite {
    pub token: SecretString,
    pub digest: String,
}

/// Generate an invite token. Nothing is persisted.
pub fn mint_invite() -> Result<MintedInvite, RoomError> {
    let token = generate_url_safe_token(DEFAULT_TOKEN_BYTES).map_err(|e| {
        tracing::error!(target: "rooms.credentials", error = %e, "Failed to generate invite token");
        RoomError::Internal("RNG failure".to_string())
    })?;
    let digest = token_digest(&token);
    Ok(MintedInvite { token, digest })
}

/// Digest of a caller-presented token, `None` if it cannot be a real token.
pub fn presented_token_digest(token: &SecretString) -> Option<String> {
    let raw = token.expose_secret();
    if raw.is_empty() || raw.len() > MAX_PRESENTED_TOKEN_LENGTH {
        return None;
    }
    Some(token_digest(token))
}

/// Persist a minted invite for `room_id`, valid for `ttl` from `now`.
#[instrument(skip_all, name = "rooms.credentials.store_invite", fields(room_id = %room_id))]
pub async fn store_invite<'e, E>(
    executor: E,
    room_id: Uuid,
    issued_by: Uuid,
    minted: &MintedInvite,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<InviteRow, RoomError>
where
    E: PgExecutor<'e>,
{
    RoomInvitesRepository::insert(executor, room_id, &minted.digest, issued_by, now + ttl).await
}

/// Whether `token` is an unrevoked, unexpired invite for `room_id`.
#[instrument(skip_all, name = "rooms.credentials.check_invite", fields(room_id = %room_id))]
pub async fn check_invite<'e, E>(
    executor: E,
    room_id: Uuid,
    token: &SecretString,
    now: DateTime<Utc>,
) -> Result<bool, RoomError>
where
    E: PgExecutor<'e>,
{
    let Some(digest) = presented_token_digest(token) else {
        return Ok(false);
    };
    RoomInvitesRepository::is_valid(executor, room_id, &digest, now).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_self_describing_argon2id() {
        let hash = hash_password(&SecretString::from("open-sesame")).unwrap();
        assert!(hash.starts_with("$argon2id$v=19$"));
        assert!(!hash.contains("open-sesame"));
    }

    #[test]
    fn test_hash_uses_fresh_salt() {
        let a = hash_password(&SecretString::from("open-sesame")).unwrap();
        let b = hash_password(&SecretString::from("open-sesame")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_correct_and_incorrect_password() {
        let hash = hash_password(&SecretString::from("open-sesame")).unwrap();
        assert!(verify_password(&SecretString::from("open-sesame"), &hash));
        assert!(!verify_password(&SecretString::from("open-sesame!"), &hash));
        assert!(!verify_password(&SecretString::from(""), &hash));
    }

    #[test]
    fn test_verify_legacy_bcrypt_hash() {
        let legacy = bcrypt::hash("letmein", 4).unwrap();
        assert!(legacy.starts_with("$2b$"));
        assert!(verify_password(&SecretString::from("letmein"), &legacy));
        assert!(!verify_password(&SecretString::from("letmeout"), &legacy));
    }

    #[test]
    fn test_malformed_hashes_never_match() {
        let plain = SecretString::from("open-sesame");
        for stored in [
            "",
            "open-sesame",
            "$argon2id$garbage",
            "$2b$garbage",
            "$scrypt$ln=15,r=8,p=1$c2FsdA$aGFzaA",
            "sha256:abcdef",
        ] {
            assert!(!verify_password(&plain, stored), "{stored:?} must not match");
        }
    }

    #[test]
    fn test_check_room_password_outcomes() {
        let hash = hash_password(&SecretString::from("open-sesame")).unwrap();
        let right = SecretString::from("open-sesame");
        let wrong = SecretString::from("nope");

        assert_eq!(check_room_password(None, None), PasswordCheck::NotRequired);
        assert_eq!(
            check_room_password(None, Some(&wrong)),
            PasswordCheck::NotRequired
        );
        assert_eq!(check_room_password(Some(&hash), None), PasswordCheck::Missing);
        assert_eq!(
            check_room_password(Some(&hash), Some(&right)),
            PasswordCheck::Matched
        );
        assert_eq!(
            check_room_password(Some(&hash), Some(&wrong)),
            PasswordCheck::Mismatch
        );
        assert_eq!(
            check_room_password(Some("corrupt"), Some(&right)),
            PasswordCheck::Mismatch
        );
    }

    #[test]
    fn test_minted_invite_digest_matches_token() {
        let minted = mint_invite().unwrap();
        assert_eq!(minted.token.expose_secret().len(), 43);
        assert_eq!(minted.digest, token_digest(&minted.token));
        assert_eq!(
            presented_token_digest(&minted.token).as_deref(),
            Some(minted.digest.as_str())
        );
    }

    #[test]
    fn test_presented_token_bounds() {
        assert_eq!(presented_token_digest(&SecretString::from("")), None);
        assert_eq!(
            presented_token_digest(&SecretString::from("x".repeat(300))),
            None
        );
    }
}
