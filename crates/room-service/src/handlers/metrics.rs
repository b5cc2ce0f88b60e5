//! Prometheus metrics endpoint handler.
//!
//! Unauthenticated so Prometheus can scrape it. Labels carry operation names
//! and outcomes only, never user or room identifiers.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Operational endpoint, not versioned under /api/v1.
///
/// ```text
/// # TYPE rooms_lifecycle_operations_total counter
/// rooms_lifecycle_operations_total{operation="join",outcome="success"} 42
/// ```
#[tracing::instrument(skip_all, name = "rooms.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
