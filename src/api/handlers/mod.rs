//! Upload API request handlers
//!
//! - `upload`: multipart form relay
//! - `status`: health check

mod status;
mod upload;

use crate::config::Config;
use crate::coordinator::RelaySettings;
use crate::storage::MultipartTransport;
use axum::http::HeaderMap;
use std::sync::Arc;

pub use status::{health_check, HealthResponse};
pub use upload::{upload_files, METADATA_FIELD};

/// Application state shared across handlers
pub struct AppState {
    pub transport: Arc<dyn MultipartTransport>,
    pub settings: RelaySettings,
}

impl AppState {
    pub fn new(transport: Arc<dyn MultipartTransport>, config: &Config) -> Self {
        Self {
            transport,
            settings: RelaySettings::from_config(config),
        }
    }
}

/// Size a form part declares through its own Content-Length header, 0 if absent.
fn declared_size(headers: &HeaderMap) -> u64 {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}
