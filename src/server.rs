use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::MAX_BODY_SIZE;
use crate::error::ApiError;
use crate::handlers::{self, AppState};

/// Build the application router with auth, body-limit, CORS, and
/// request-trace middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/tabs", get(handlers::tabs))
        .route("/snapshot", get(handlers::snapshot))
        .route("/screenshot", get(handlers::screenshot))
        .route("/text", get(handlers::text))
        .route("/navigate", post(handlers::navigate_handler))
        .route("/action", post(handlers::action))
        .route("/evaluate", post(handlers::evaluate))
        .route("/tab", post(handlers::tab))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            check_auth,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            check_shutdown,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Reject requests arriving after shutdown began.
async fn check_shutdown(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.is_shutting_down() {
        return ApiError::shutdown().into_response();
    }
    next.run(request).await
}

/// Bearer-token auth, enabled when `BRIDGE_TOKEN` is configured. Accepts
/// `Authorization: Bearer <token>` or `X-Bridge-Token: <token>`.
async fn check_auth(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let token = &state.config.token;
    if token.is_empty() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t == token)
        || request
            .headers()
            .get("x-bridge-token")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|t| t == token);

    if !authorized {
        return ApiError::unauthorized().into_response();
    }
    next.run(request).await
}
