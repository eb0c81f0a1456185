//! Router configuration for the read API.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::api_status))
        .route("/api/records/:record_type", get(handlers::list_records))
        .route("/api/records/:record_type/:id", get(handlers::get_record))
        .route("/api/cache/:prefix", delete(handlers::clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
