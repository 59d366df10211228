//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(
            "/v1/archive",
            post(handlers::upload_archive)
                .get(handlers::download_archive)
                .delete(handlers::delete_archive),
        )
        .route("/v1/archive/{id}", post(handlers::upload_named_archive))
        .route(
            "/v1/status",
            get(handlers::get_status).post(handlers::set_extra),
        )
        .route("/v1/events", get(handlers::stream_events))
        .route("/healthz", get(handlers::healthz));

    // When enabled, restrict this endpoint to scraper networks.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
