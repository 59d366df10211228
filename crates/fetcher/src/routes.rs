//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/fetch", post(handlers::fetch))
        .route("/specialize", post(handlers::specialize))
        .route("/upload", post(handlers::upload))
        .route("/version", get(handlers::version))
        .route("/healthz", get(handlers::healthz))
        .route("/readiness-healthz", get(handlers::readiness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
