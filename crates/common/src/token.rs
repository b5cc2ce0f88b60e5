//! Random bearer-style tokens and their one-way digests.
//!
//! Invite tokens and session tokens share the same handling: the raw value is
//! generated from the system CSPRNG, handed to the caller once, and only its
//! SHA-256 digest is ever persisted or compared.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Default token length in random bytes (256 bits).
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Failure of the system random source.
#[derive(Debug, Error)]
#[error("Random number generator failure")]
pub struct RandomSourceError;

/// Generate a URL-safe token of `len` random bytes (base64url, no padding).
///
/// # Errors
///
/// Returns [`RandomSourceError`] if the system CSPRNG cannot be read.
pub fn generate_url_safe_token(len: usize) -> Result<SecretString, RandomSourceError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes).map_err(|_| RandomSourceError)?;
    Ok(SecretString::from(URL_SAFE_NO_PAD.encode(&bytes)))
}

/// Hex-encoded SHA-256 digest of a token.
#[must_use]
pub fn token_digest(token: &SecretString) -> String {
    hex::encode(digest(&SHA256, token.expose_secret().as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_url_safe() {
        let token = generate_url_safe_token(DEFAULT_TOKEN_BYTES).unwrap();
        let raw = token.expose_secret();

        // 32 bytes base64url without padding = 43 characters
        assert_eq!(raw.len(), 43);
        assert!(raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_differ() {
        let a = generate_url_safe_token(DEFAULT_TOKEN_BYTES).unwrap();
        let b = generate_url_safe_token(DEFAULT_TOKEN_BYTES).unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }

    #[test]
    fn test_digest_is_stable_and_hex() {
        let token = SecretString::from("abc");
        let first = token_digest(&token);
        let second = token_digest(&SecretString::from("abc"));

        assert_eq!(first, second);
        assert_eq!(
            first,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_differs_from_token() {
        let token = generate_url_safe_token(DEFAULT_TOKEN_BYTES).unwrap();
        let d = token_digest(&token);
        assert_ne!(d, token.expose_secret());
        assert_eq!(d.len(), 64);
    }
}
