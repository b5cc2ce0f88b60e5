//! HTTP request handlers for the room service.
//!
//! Handlers are thin: parse, delegate to the lifecycle controller, map the
//! result. JSON bodies are parsed by hand so malformed input is a 400
//! `VALIDATION_ERROR` rather than axum's default 422.

pub mod health;
pub mod metrics;
pub mod room_requests;
pub mod rooms;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;

use crate::errors::RoomError;
use serde::de::DeserializeOwned;

/// Parse a required JSON body.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, RoomError> {
    serde_json::from_slice(body)
        .map_err(|e| RoomError::Validation(format!("Invalid request body: {e}")))
}

/// Parse an optional JSON body; an empty body is the default value.
pub(crate) fn parse_optional_json<T: DeserializeOwned + Default>(
    body: &[u8],
) -> Result<T, RoomError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}
