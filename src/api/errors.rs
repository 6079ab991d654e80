//! Upload API error types and JSON error responses

use crate::coordinator::UploadError;
use crate::storage::TransportError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors returned to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("MalformedForm: {0}")]
    MalformedForm(String),

    #[error("MissingFile: The request did not contain a file field.")]
    MissingFile,

    #[error("InvalidKey: {0}")]
    InvalidKey(String),

    #[error("EntityTooLarge: Upload of {size} bytes exceeds the maximum of {max} bytes.")]
    EntityTooLarge { size: u64, max: u64 },

    #[error("BackendError: {0}")]
    BackendError(String),

    #[error("InternalError: We encountered an internal error. Please try again.")]
    InternalError(String),
}

impl ApiError {
    /// Get the error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MalformedForm(_) => "MalformedForm",
            ApiError::MissingFile => "MissingFile",
            ApiError::InvalidKey(_) => "InvalidKey",
            ApiError::EntityTooLarge { .. } => "EntityTooLarge",
            ApiError::BackendError(_) => "BackendError",
            ApiError::InternalError(_) => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MalformedForm(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            ApiError::EntityTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BackendError(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::BackendError(err.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Source(msg) => ApiError::MalformedForm(msg),
            UploadError::TooLarge { size, max } => ApiError::EntityTooLarge { size, max },
            UploadError::InvalidKey(e) => ApiError::InvalidKey(e.to_string()),
            UploadError::Internal(msg) => ApiError::InternalError(msg),
            other @ (UploadError::SessionStart(_)
            | UploadError::PartUpload { .. }
            | UploadError::Finalize(_)) => ApiError::BackendError(other.to_string()),
        }
    }
}
