//! HTTP upload API

mod errors;
pub mod handlers;

pub use errors::ApiError;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use handlers::{health_check, upload_files, AppState};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router
///
///   POST /upload - relay every file field of a multipart form
///   GET /health  - liveness and build info
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/upload", post(upload_files))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        // Bodies are streamed, never buffered; per-file size is enforced by
        // the coordinator against max_upload_size.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
