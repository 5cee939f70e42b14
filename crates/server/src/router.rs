//! HTTP router construction.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;
use crate::{api, live};

/// Build the application router. CORS is layered on by the caller.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/scrape", post(api::scrape))
        .route("/jobs", get(api::list_jobs))
        .route("/status/{job_id}", get(api::job_status))
        .route("/result/{job_id}", get(api::job_result))
        .route("/download/{job_id}/{format}", get(api::download))
        .route("/cancel/{job_id}", post(api::cancel))
        .route("/ws/{job_id}", get(live::ws_upgrade))
        .with_state(state)
}

/// Allow the configured frontend origin, or anything when it is `*` or invalid.
pub fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<axum::http::HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
        Err(_) => {
            tracing::warn!(origin, "invalid CORS origin, allowing all origins");
            CorsLayer::permissive()
        }
    }
}
