//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `operation`: bounded by code (create_room, join_room, ...)
//! - `outcome`: `success` or a `RoomError::kind()` value

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return a handle for `/metrics`.
///
/// # Errors
///
/// Returns an error if buckets are invalid or a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    configured_builder()?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Build a handle without installing a global recorder (tests, harnesses).
pub fn detached_handle() -> Result<PrometheusHandle, String> {
    Ok(configured_builder()?.build_recorder().handle())
}

fn configured_builder() -> Result<PrometheusBuilder, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("room_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Lifecycle operations include argon2 hashing on create/join
        .set_buckets_for_metric(
            Matcher::Prefix("room_lifecycle_operation".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set lifecycle buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("room_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `room_http_requests_total`, `room_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Captures framework-level rejections (404, 405, 415) as well as handler
/// responses.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("room_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("room_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
///
/// Replaces meet codes, request ids, user ids and invite ids with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/api/v1/rooms" | "/api/v1/room-requests" => {
            path.to_string()
        }
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();

    // ["", "api", "v1", "rooms", code, ...]
    if path.starts_with("/api/v1/rooms/") {
        match parts.as_slice() {
            [_, _, _, _, _] => return "/api/v1/rooms/{code}".to_string(),
            [_, _, _, _, _, action] => {
                if matches!(
                    *action,
                    "join" | "leave" | "start" | "end" | "cancel" | "participants" | "invites"
                ) {
                    return format!("/api/v1/rooms/{{code}}/{action}");
                }
            }
            [_, _, _, _, _, "me", "media"] => return "/api/v1/rooms/{code}/me/media".to_string(),
            [_, _, _, _, _, "invites", _] => {
                return "/api/v1/rooms/{code}/invites/{invite_id}".to_string()
            }
            [_, _, _, _, _, "participants", _, "kick"] => {
                return "/api/v1/rooms/{code}/participants/{user_id}/kick".to_string()
            }
            _ => {}
        }
    }

    if path.starts_with("/api/v1/room-requests/") {
        if let [_, _, _, _, _, action] = parts.as_slice() {
            if matches!(*action, "approve" | "reject") {
                return format!("/api/v1/room-requests/{{id}}/{action}");
            }
        }
    }

    "/other".to_string()
}

// ============================================================================
// Lifecycle Metrics
// ============================================================================

/// Record a lifecycle controller operation.
///
/// Metric: `room_lifecycle_operations_total`, `room_lifecycle_operation_duration_seconds`
/// Labels: `operation`, `outcome`
pub fn record_lifecycle_operation(operation: &str, outcome: &str, duration: Duration) {
    histogram!("room_lifecycle_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("room_lifecycle_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record meet code collisions encountered while allocating a code.
///
/// Metric: `room_meet_code_collisions_total`
pub fn record_meet_code_collisions(collisions: u32) {
    if collisions > 0 {
        counter!("room_meet_code_collisions_total").increment(u64::from(collisions));
    }
}

/// Record requests transitioned to `expired` by one sweep.
///
/// Metric: `room_requests_expired_total`
pub fn record_requests_expired(count: u64) {
    counter!("room_requests_expired_total").increment(count);
}

/// Record a rate limiter denial.
///
/// Metric: `room_rate_limited_total`
/// Labels: `action`
pub fn record_rate_limited(action: &str) {
    counter!("room_rate_limited_total", "action" => action.to_string()).increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `room_db_query_duration_seconds`, `room_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("room_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("room_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests run the recording functions against the global no-op
    // recorder; values are not asserted.

    #[test]
    fn test_record_functions_do_not_panic() {
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("POST", "/api/v1/rooms/ABCD2345/join", 409, Duration::from_millis(20));
        record_lifecycle_operation("join_room", "success", Duration::from_millis(12));
        record_lifecycle_operation("approve_request", "gone", Duration::from_millis(8));
        record_meet_code_collisions(0);
        record_meet_code_collisions(2);
        record_requests_expired(3);
        record_rate_limited("create_room");
        record_db_query("lock_room", "success", Duration::from_millis(1));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(409), "error");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    fn test_normalize_static_endpoints() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/api/v1/rooms"), "/api/v1/rooms");
        assert_eq!(
            normalize_endpoint("/api/v1/room-requests"),
            "/api/v1/room-requests"
        );
    }

    #[test]
    fn test_normalize_room_endpoints() {
        assert_eq!(
            normalize_endpoint("/api/v1/rooms/K7QW2MZP"),
            "/api/v1/rooms/{code}"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/rooms/K7QW2MZP/join"),
            "/api/v1/rooms/{code}/join"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/rooms/K7QW2MZP/end"),
            "/api/v1/rooms/{code}/end"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/rooms/K7QW2MZP/me/media"),
            "/api/v1/rooms/{code}/me/media"
        );
        assert_eq!(
            normalize_endpoint(
                "/api/v1/rooms/K7QW2MZP/participants/3b241101-e2bb-4255-8caf-4136c566a962/kick"
            ),
            "/api/v1/rooms/{code}/participants/{user_id}/kick"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/rooms/K7QW2MZP/invites/3b241101-e2bb-4255-8caf-4136c566a962"),
            "/api/v1/rooms/{code}/invites/{invite_id}"
        );
    }

    #[test]
    fn test_normalize_request_endpoints() {
        assert_eq!(
            normalize_endpoint("/api/v1/room-requests/3b241101-e2bb-4255-8caf-4136c566a962/approve"),
            "/api/v1/room-requests/{id}/approve"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/room-requests/3b241101-e2bb-4255-8caf-4136c566a962/reject"),
            "/api/v1/room-requests/{id}/reject"
        );
    }

    #[test]
    fn test_normalize_unknown_paths() {
        assert_eq!(normalize_endpoint("/api/v1/rooms/ABC/unknown"), "/other");
        assert_eq!(normalize_endpoint("/api/v2/rooms"), "/other");
        assert_eq!(normalize_endpoint("/random"), "/other");
        assert_eq!(
            normalize_endpoint("/api/v1/room-requests/abc/withdraw"),
            "/other"
        );
    }

    #[test]
    fn test_detached_handle_renders() {
        let handle = detached_handle();
        assert!(handle.is_ok());
    }
}
