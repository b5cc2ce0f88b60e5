//! HTTP routes for the room service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers::{self, room_requests, rooms};
use crate::middleware::{http_metrics_middleware, require_actor, AuthState};
use crate::services::{ActorResolver, RoomLifecycle};
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (readiness probe).
    pub pool: PgPool,

    pub config: Config,

    /// Lifecycle controller; every room operation goes through it.
    pub lifecycle: Arc<RoomLifecycle>,

    /// Bearer token to actor resolution.
    pub actor_resolver: Arc<dyn ActorResolver>,
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public, unversioned
/// - `/api/v1/rooms...` and `/api/v1/room-requests...` - require a session
/// - TraceLayer for request logging
/// - HTTP metrics middleware, outermost
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        resolver: state.actor_resolver.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route(
            "/api/v1/rooms",
            post(rooms::create_room).get(rooms::list_rooms),
        )
        .route("/api/v1/rooms/:code", get(rooms::get_room))
        .route("/api/v1/rooms/:code/join", post(rooms::join_room))
        .route("/api/v1/rooms/:code/leave", post(rooms::leave_room))
        .route("/api/v1/rooms/:code/start", post(rooms::start_room))
        .route("/api/v1/rooms/:code/end", post(rooms::end_room))
        .route("/api/v1/rooms/:code/cancel", post(rooms::cancel_room))
        .route(
            "/api/v1/rooms/:code/participants",
            get(rooms::list_participants),
        )
        .route(
            "/api/v1/rooms/:code/participants/:user_id/kick",
            post(rooms::kick_participant),
        )
        .route("/api/v1/rooms/:code/me/media", patch(rooms::update_media))
        .route("/api/v1/rooms/:code/invites", post(rooms::issue_invite))
        .route(
            "/api/v1/rooms/:code/invites/:invite_id",
            delete(rooms::revoke_invite),
        )
        .route(
            "/api/v1/room-requests",
            post(room_requests::request_room).get(room_requests::list_requests),
        )
        .route(
            "/api/v1/room-requests/:id/approve",
            post(room_requests::approve_request),
        )
        .route(
            "/api/v1/room-requests/:id/reject",
            post(room_requests::reject_request),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_actor))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees 404/405 too)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
