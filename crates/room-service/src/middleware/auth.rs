//! Authentication middleware for the rooms API.
//!
//! Extracts the Bearer session token from the Authorization header, resolves
//! it to an [`Actor`](crate::models::Actor) and injects the actor into request
//! extensions for handlers.

use crate::errors::RoomError;
use crate::services::ActorResolver;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use common::secret::SecretString;
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<dyn ActorResolver>,
}

/// Resolve the caller or reject with 401.
///
/// ```text
/// Authorization: Bearer <session token>
/// ```
///
/// Missing, malformed, unknown, expired and revoked tokens are all
/// `401 UNAUTHENTICATED` with a `WWW-Authenticate` header.
#[instrument(skip_all, name = "rooms.middleware.auth")]
pub async fn require_actor(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, RoomError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "rooms.middleware.auth", "Missing Authorization header");
            RoomError::Unauthenticated("Missing Authorization header".to_string())
        })?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "rooms.middleware.auth", "Invalid Authorization header format");
            RoomError::Unauthenticated("Invalid Authorization header format".to_string())
        })?;
    let token = SecretString::from(token.to_string());

    let actor = state.resolver.resolve(&token).await?;
    tracing::debug!(target: "rooms.middleware.auth", user_id = %actor.user_id, "Actor resolved");

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Actor, PlatformRole};
    use crate::services::sessions::mock::StaticActorResolver;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn whoami(Extension(actor): Extension<Actor>) -> String {
        actor.display_name
    }

    fn test_app() -> Router {
        let actor = Actor {
            user_id: Uuid::new_v4(),
            display_name: "Ada".to_string(),
            platform_role: PlatformRole::Member,
            course_affiliations: vec![],
        };
        let state = Arc::new(AuthState {
            resolver: Arc::new(StaticActorResolver::new().with_actor("good-token", actor)),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state, require_actor))
    }

    async fn call(authorization: Option<&str>) -> axum::response::Response {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        test_app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[tokio::test]
    async fn test_valid_token_injects_actor() {
        let response = call(Some("Bearer good-token")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthenticated() {
        let response = call(None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_unauthenticated() {
        let response = call(Some("Basic Z29vZC10b2tlbg==")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthenticated() {
        let response = call(Some("Bearer nope")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
