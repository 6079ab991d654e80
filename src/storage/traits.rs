//! Multipart transport trait definitions

use crate::types::{CompletedPart, ResponseMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during transport calls
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("No such upload session: {0}")]
    NoSuchSession(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Parts were not in ascending order")]
    InvalidPartOrder,

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Returned by `begin_session`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session_id: String,
    pub response_metadata: ResponseMetadata,
}

/// Black-box multipart upload transport.
///
/// Every call is a single attempt; callers never retry. Implementations must
/// be safe to call concurrently for different parts of the same session.
///
/// This trait is object-safe and can be used with `Arc<dyn MultipartTransport>`.
#[async_trait]
pub trait MultipartTransport: Send + Sync {
    /// Open a multipart session for `bucket/key`
    async fn begin_session(&self, bucket: &str, key: &str) -> Result<SessionStart, TransportError>;

    /// Upload one part, returns its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError>;

    /// Assemble the object from the listed parts
    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError>;

    /// Discard the session and every part uploaded to it
    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> Result<(), TransportError>;

    /// Single-shot upload, used when a stream produced no parts at all
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes)
        -> Result<(), TransportError>;

    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;
}

/// Blanket implementation for boxed trait objects, enabling dynamic dispatch
#[async_trait]
impl MultipartTransport for Box<dyn MultipartTransport> {
    async fn begin_session(&self, bucket: &str, key: &str) -> Result<SessionStart, TransportError> {
        (**self).begin_session(bucket, key).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError> {
        (**self)
            .upload_part(bucket, key, session_id, part_number, body)
            .await
    }

    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError> {
        (**self)
            .complete_session(bucket, key, session_id, parts)
            .await
    }

    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> Result<(), TransportError> {
        (**self).abort_session(bucket, key, session_id).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<(), TransportError> {
        (**self).put_object(bucket, key, body).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
