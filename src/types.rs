//! Core types shared by the chunker, the coordinator and the HTTP layer

use crate::storage::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::task::JoinHandle;
use tracing::warn;

/// Upper bound for a single chunk handed to the part uploader.
///
/// Every chunk except the last one of a stream is exactly this long, which
/// keeps all non-final parts above S3's 5 MiB minimum part size.
pub const MAX_CHUNK_SIZE: usize = 9_000_000;

/// Metadata field naming the key namespace when none is configured.
pub const DEFAULT_NAMESPACE_FIELD: &str = "client";

/// Errors that can occur when validating a derived object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// Destination key of an upload, split into its components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Deployment-wide key root (e.g. `main`)
    pub root: Option<String>,
    /// Caller-supplied namespace taken from the upload metadata
    pub namespace: Option<String>,
    /// Original filename of the uploaded file
    pub filename: String,
}

impl ObjectKey {
    pub fn new(root: Option<&str>, namespace: Option<&str>, filename: &str) -> Self {
        let clean = |s: &str| {
            let s = s.trim_matches('/');
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            root: root.and_then(clean),
            namespace: namespace.and_then(clean),
            filename: filename.to_string(),
        }
    }

    /// Get the full key (`root/namespace/filename`, empty parts skipped)
    pub fn full_key(&self) -> String {
        let mut key = String::new();
        for part in [&self.root, &self.namespace].into_iter().flatten() {
            key.push_str(part);
            key.push('/');
        }
        key.push_str(&self.filename);
        key
    }

    /// Validate the key before a session is opened for it.
    pub fn validate(&self) -> Result<(), KeyValidationError> {
        if let Some(ref root) = self.root {
            validate_key_path(root, true)?;
        }
        if let Some(ref namespace) = self.namespace {
            validate_key_path(namespace, true)?;
        }
        validate_key_path(&self.filename, false)?;
        if self.filename.is_empty() {
            return Err(KeyValidationError(
                "Filename must not be empty".to_string(),
            ));
        }
        if self.filename == "." || self.filename == ".." {
            return Err(KeyValidationError("Invalid filename".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_key())
    }
}

fn validate_key_path(value: &str, allow_slashes: bool) -> Result<(), KeyValidationError> {
    if value.contains('\0') {
        return Err(KeyValidationError(
            "Key must not contain NUL bytes".to_string(),
        ));
    }
    if value.contains('\\') {
        return Err(KeyValidationError(
            "Key must not contain backslashes".to_string(),
        ));
    }
    if !allow_slashes && value.contains('/') {
        return Err(KeyValidationError(
            "Filename must not contain '/'".to_string(),
        ));
    }

    for segment in value.split('/') {
        if segment == ".." {
            return Err(KeyValidationError(
                "Key must not contain '..' path segments".to_string(),
            ));
        }
    }

    Ok(())
}

/// Caller-supplied structured data sent alongside the file.
///
/// Always a JSON object. Anything that does not parse as one is replaced by
/// an empty object; the upload itself never fails because of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadMetadata(pub serde_json::Map<String, serde_json::Value>);

impl UploadMetadata {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Self(map),
            Ok(other) => {
                warn!("Upload metadata is not a JSON object ({}), using {{}}", kind(&other));
                Self::default()
            }
            Err(e) => {
                warn!("Malformed upload metadata, using {{}}: {}", e);
                Self::default()
            }
        }
    }

    /// Key namespace taken from `field`; strings and numbers are accepted.
    pub fn namespace(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Acknowledged part, as passed to the complete-session call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Response metadata returned by the backend when a session is opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_request_id: Option<String>,
}

/// Lifecycle of one upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    SessionOpen,
    Uploading,
    Finalizing,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, SessionOpen)
                | (SessionOpen, Uploading)
                | (SessionOpen, Finalizing)
                | (Uploading, Uploading)
                | (Uploading, Finalizing)
                | (SessionOpen, Aborted)
                | (Uploading, Aborted)
                | (Finalizing, Completed)
                | (Finalizing, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::SessionOpen => "session_open",
            SessionState::Uploading => "uploading",
            SessionState::Finalizing => "finalizing",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A part upload that has been dispatched but not yet awaited
pub struct PendingPart {
    pub part_number: u32,
    pub size: u64,
    pub handle: JoinHandle<Result<String, TransportError>>,
}

/// State of one in-progress upload. Owned by a single coordinator.
pub struct UploadSession {
    pub session_id: Option<String>,
    pub object_key: ObjectKey,
    pub filename: String,
    pub total_bytes_declared: u64,
    pub bytes_observed: u64,
    pub chunk_count: u32,
    pub dispatch_in_flight: bool,
    pub pending_parts: Vec<PendingPart>,
    pub completed_parts: Vec<CompletedPart>,
    pub metadata: UploadMetadata,
    pub response_metadata: ResponseMetadata,
    pub state: SessionState,
}

impl UploadSession {
    pub fn new(
        object_key: ObjectKey,
        filename: String,
        total_bytes_declared: u64,
        metadata: UploadMetadata,
    ) -> Self {
        Self {
            session_id: None,
            object_key,
            filename,
            total_bytes_declared,
            bytes_observed: 0,
            chunk_count: 0,
            dispatch_in_flight: false,
            pending_parts: Vec::new(),
            completed_parts: Vec::new(),
            metadata,
            response_metadata: ResponseMetadata::default(),
            state: SessionState::Created,
        }
    }

    /// Declared size when the source reported one, otherwise the bytes seen.
    pub fn final_size(&self) -> u64 {
        if self.total_bytes_declared > 0 {
            self.total_bytes_declared
        } else {
            self.bytes_observed
        }
    }

    pub fn to_final_info(&self) -> FinalUploadInfo {
        FinalUploadInfo {
            id: self.session_id.clone(),
            key: self.object_key.full_key(),
            filename: self.filename.clone(),
            size: self.final_size(),
            chunks: self.chunk_count,
            parts: self.completed_parts.clone(),
            data: self.metadata.clone(),
            metadata: self.response_metadata.clone(),
        }
    }
}

impl fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSession")
            .field("session_id", &self.session_id)
            .field("object_key", &self.object_key.full_key())
            .field("bytes_observed", &self.bytes_observed)
            .field("chunk_count", &self.chunk_count)
            .field("pending_parts", &self.pending_parts.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Result of a successfully relayed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalUploadInfo {
    /// Backend session ID; `None` when the file went through a single-shot put
    pub id: Option<String>,
    pub key: String,
    pub filename: String,
    pub size: u64,
    pub chunks: u32,
    pub parts: Vec<CompletedPart>,
    /// Caller-supplied metadata
    pub data: UploadMetadata,
    /// Backend response metadata from session begin
    pub metadata: ResponseMetadata,
}
