//! Room service error types.
//!
//! Every business-rule failure of the lifecycle controller is a typed
//! `RoomError`. All variants map to HTTP status codes via the `IntoResponse`
//! impl. Store and internal failures are logged server-side and replaced with
//! a generic message; no password hash, token or roster detail is ever placed
//! in an error payload.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Room service error type.
///
/// Maps to HTTP status codes:
/// - Validation: 400 Bad Request
/// - Unauthenticated: 401 Unauthorized
/// - Forbidden, CanCreateDirectly: 403 Forbidden
/// - NotFound: 404 Not Found
/// - Conflict, TooManyPending: 409 Conflict
/// - Gone: 410 Gone
/// - RateLimitExceeded: 429 Too Many Requests
/// - ExhaustedRetries: 503 Service Unavailable
/// - Database, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many pending requests (limit {limit})")]
    TooManyPending { limit: i64 },

    #[error("Request not needed: caller can create this room directly")]
    CanCreateDirectly,

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Exhausted retries while allocating a meeting code")]
    ExhaustedRetries,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RoomError::Validation(_) => 400,
            RoomError::Unauthenticated(_) => 401,
            RoomError::Forbidden(_) | RoomError::CanCreateDirectly => 403,
            RoomError::NotFound(_) => 404,
            RoomError::Conflict(_) | RoomError::TooManyPending { .. } => 409,
            RoomError::Gone(_) => 410,
            RoomError::RateLimitExceeded => 429,
            RoomError::ExhaustedRetries => 503,
            RoomError::Database(_) | RoomError::Internal(_) => 500,
        }
    }

    /// Short bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RoomError::Database(_) => "database",
            RoomError::Unauthenticated(_) => "unauthenticated",
            RoomError::Validation(_) => "validation",
            RoomError::Forbidden(_) => "forbidden",
            RoomError::NotFound(_) => "not_found",
            RoomError::Conflict(_) => "conflict",
            RoomError::TooManyPending { .. } => "too_many_pending",
            RoomError::CanCreateDirectly => "can_create_directly",
            RoomError::Gone(_) => "gone",
            RoomError::ExhaustedRetries => "exhausted_retries",
            RoomError::RateLimitExceeded => "rate_limited",
            RoomError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RoomError::Database(err) => {
                tracing::error!(target: "rooms.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            RoomError::Unauthenticated(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", reason.clone())
            }
            RoomError::Validation(reason) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", reason.clone())
            }
            RoomError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            RoomError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            RoomError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            RoomError::TooManyPending { limit } => (
                StatusCode::CONFLICT,
                "TOO_MANY_PENDING",
                format!("You already have {limit} pending room requests"),
            ),
            RoomError::CanCreateDirectly => (
                StatusCode::FORBIDDEN,
                "CAN_CREATE_DIRECTLY",
                "You can create this room directly; no request is needed".to_string(),
            ),
            RoomError::Gone(reason) => (StatusCode::GONE, "GONE", reason.clone()),
            RoomError::ExhaustedRetries => {
                tracing::warn!(target: "rooms.availability", "Meeting code allocation exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "EXHAUSTED_RETRIES",
                    "Could not allocate a meeting code. Please try again.".to_string(),
                )
            }
            RoomError::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "Too many requests. Please try again later.".to_string(),
            ),
            RoomError::Internal(reason) => {
                tracing::error!(target: "rooms.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"rooms-api\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to RoomError
impl From<sqlx::Error> for RoomError {
    fn from(err: sqlx::Error) -> Self {
        RoomError::Database(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RoomError::Validation("name too short".to_string()).to_string(),
            "Validation failed: name too short"
        );
        assert_eq!(
            RoomError::TooManyPending { limit: 3 }.to_string(),
            "Too many pending requests (limit 3)"
        );
        assert_eq!(
            RoomError::Gone("request expired".to_string()).to_string(),
            "Gone: request expired"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RoomError::Database("x".to_string()).status_code(), 500);
        assert_eq!(RoomError::Unauthenticated("x".to_string()).status_code(), 401);
        assert_eq!(RoomError::Validation("x".to_string()).status_code(), 400);
        assert_eq!(RoomError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(RoomError::CanCreateDirectly.status_code(), 403);
        assert_eq!(RoomError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(RoomError::Conflict("x".to_string()).status_code(), 409);
        assert_eq!(RoomError::TooManyPending { limit: 3 }.status_code(), 409);
        assert_eq!(RoomError::Gone("x".to_string()).status_code(), 410);
        assert_eq!(RoomError::RateLimitExceeded.status_code(), 429);
        assert_eq!(RoomError::ExhaustedRetries.status_code(), 503);
        assert_eq!(RoomError::Internal("x".to_string()).status_code(), 500);
    }

    #[tokio::test]
    async fn test_into_response_database_error_is_generic() {
        let response = RoomError::Database("relation rooms does not exist".to_string())
            .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body_json["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_unauthenticated_sets_header() {
        let response = RoomError::Unauthenticated("missing token".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(www_auth, "Bearer realm=\"rooms-api\"");

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "UNAUTHENTICATED");
        assert_eq!(body_json["error"]["message"], "missing token");
    }

    #[tokio::test]
    async fn test_into_response_gone() {
        let response = RoomError::Gone("Room request has expired".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::GONE);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "GONE");
        assert_eq!(body_json["error"]["message"], "Room request has expired");
    }

    #[tokio::test]
    async fn test_into_response_too_many_pending() {
        let response = RoomError::TooManyPending { limit: 3 }.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "TOO_MANY_PENDING");
    }

    #[tokio::test]
    async fn test_into_response_exhausted_retries() {
        let response = RoomError::ExhaustedRetries.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "EXHAUSTED_RETRIES");
    }

    #[tokio::test]
    async fn test_into_response_internal_hides_reason() {
        let response = RoomError::Internal("rng failure".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body_json["error"]["message"], "An internal error occurred");
    }
}
