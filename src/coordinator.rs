//! Part upload coordinator - owns one multipart upload session end-to-end
//!
//! The coordinator drives a pull loop over a [`ChunkReader`]: each chunk is
//! handed to a spawned part-upload task and the next chunk is only pulled once
//! that handoff is booked and a concurrency permit is available. At end of
//! stream every part result is awaited, re-sequenced by part number and the
//! session is completed. Any failure after the session was opened aborts it.

use crate::chunk::{Chunk, ChunkError, ChunkReader};
use crate::config::Config;
use crate::storage::{MultipartTransport, TransportError};
use crate::types::{
    CompletedPart, FinalUploadInfo, KeyValidationError, ObjectKey, PendingPart, SessionState,
    UploadMetadata, UploadSession,
};
use bytes::Bytes;
use futures::future::join_all;
use futures::Stream;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

/// A part that could not be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFailure {
    pub part_number: u32,
    pub error: String,
}

fn describe_failures(failures: &[PartFailure]) -> String {
    let parts: Vec<String> = failures
        .iter()
        .map(|f| format!("part {}: {}", f.part_number, f.error))
        .collect();
    parts.join("; ")
}

/// Errors that end an upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to begin upload session: {0}")]
    SessionStart(#[source] TransportError),

    #[error("{} part upload(s) failed: {}", .failures.len(), describe_failures(.failures))]
    PartUpload { failures: Vec<PartFailure> },

    #[error("Failed to complete upload session: {0}")]
    Finalize(#[source] TransportError),

    #[error("Failed to read upload stream: {0}")]
    Source(String),

    #[error("Upload too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid object key: {0}")]
    InvalidKey(#[from] KeyValidationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChunkError> for UploadError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Source(msg) => UploadError::Source(msg),
        }
    }
}

/// Per-deployment settings shared by every coordinator
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bucket: String,
    pub key_root: Option<String>,
    pub namespace_field: String,
    pub max_concurrent_parts: usize,
    pub max_upload_size: u64,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.bucket.clone(),
            key_root: config.key_root.clone(),
            namespace_field: config.namespace_field.clone(),
            max_concurrent_parts: config.max_concurrent_parts.max(1),
            max_upload_size: config.max_upload_size,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One file as handed over by the form parser
pub struct IncomingFile<S> {
    pub stream: S,
    pub original_filename: String,
    /// Size reported by the source, 0 when unknown
    pub declared_size: u64,
    /// Raw caller metadata, expected to be a JSON object
    pub metadata: String,
}

impl<S> fmt::Debug for IncomingFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingFile")
            .field("original_filename", &self.original_filename)
            .field("declared_size", &self.declared_size)
            .finish()
    }
}

/// Relay one file to the transport. Convenience wrapper over
/// [`PartUploadCoordinator::run`].
pub async fn relay_file<S, E>(
    transport: Arc<dyn MultipartTransport>,
    settings: &RelaySettings,
    file: IncomingFile<S>,
) -> Result<FinalUploadInfo, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    let IncomingFile {
        stream,
        original_filename,
        declared_size,
        metadata,
    } = file;
    let coordinator = PartUploadCoordinator::new(
        transport,
        settings.clone(),
        original_filename,
        declared_size,
        &metadata,
    );
    coordinator.run(ChunkReader::new(stream)).await
}

/// Owns one [`UploadSession`]. All session mutation happens here; part
/// upload tasks only report back through their join handles.
pub struct PartUploadCoordinator {
    transport: Arc<dyn MultipartTransport>,
    settings: RelaySettings,
    session: UploadSession,
    key: String,
    permits: Arc<Semaphore>,
}

impl PartUploadCoordinator {
    pub fn new(
        transport: Arc<dyn MultipartTransport>,
        settings: RelaySettings,
        original_filename: String,
        declared_size: u64,
        raw_metadata: &str,
    ) -> Self {
        let metadata = UploadMetadata::parse(raw_metadata);
        let namespace = metadata.namespace(&settings.namespace_field);
        let object_key = ObjectKey::new(
            settings.key_root.as_deref(),
            namespace.as_deref(),
            &original_filename,
        );
        let key = object_key.full_key();
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_parts.max(1)));

        Self {
            transport,
            settings,
            session: UploadSession::new(object_key, original_filename, declared_size, metadata),
            key,
            permits,
        }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run the whole lifecycle: begin, pull/dispatch until end of stream,
    /// then finalize. Aborts the session on any failure after begin.
    #[instrument(skip(self, reader), fields(key = %self.key))]
    pub async fn run<S, E>(mut self, mut reader: ChunkReader<S>) -> Result<FinalUploadInfo, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        self.begin().await?;
        info!("Starting upload of {}", self.session.filename);

        if let Err(e) = self.pump(&mut reader).await {
            return Err(self.fail(e).await);
        }

        self.finalize().await
    }

    /// Open the remote session. Nothing may be dispatched before this returns.
    pub async fn begin(&mut self) -> Result<String, UploadError> {
        self.session.object_key.validate()?;

        let max = self.settings.max_upload_size;
        if self.session.total_bytes_declared > max {
            return Err(UploadError::TooLarge {
                size: self.session.total_bytes_declared,
                max,
            });
        }

        let start = self
            .transport
            .begin_session(&self.settings.bucket, &self.key)
            .await
            .map_err(UploadError::SessionStart)?;

        self.session.session_id = Some(start.session_id.clone());
        self.session.response_metadata = start.response_metadata;
        self.transition(SessionState::SessionOpen)?;
        debug!(
            "Opened session {} for {}/{}",
            start.session_id, self.settings.bucket, self.key
        );
        Ok(start.session_id)
    }

    /// Pull loop. A permit is taken before each pull, so the source is never
    /// read while `max_concurrent_parts` uploads are still outstanding.
    async fn pump<S, E>(&mut self, reader: &mut ChunkReader<S>) -> Result<(), UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        loop {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| UploadError::Internal("part permit semaphore closed".into()))?;

            match reader.next_chunk().await? {
                Some(chunk) => self.dispatch_part(chunk, permit)?,
                None => return Ok(()),
            }
        }
    }

    fn begin_handoff(&mut self) -> Result<(), UploadError> {
        if self.session.dispatch_in_flight {
            return Err(UploadError::Internal(
                "chunk handoff already in flight".to_string(),
            ));
        }
        self.session.dispatch_in_flight = true;
        Ok(())
    }

    fn end_handoff(&mut self) {
        self.session.dispatch_in_flight = false;
    }

    /// Book a chunk and spawn its upload. Only bookkeeping happens here; the
    /// network call runs concurrently with further reads.
    pub fn dispatch_part(
        &mut self,
        chunk: Chunk,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), UploadError> {
        self.begin_handoff()?;
        let booked = self.book_chunk(&chunk);
        let result = booked.map(|part_number| self.spawn_part(part_number, chunk.data, permit));
        self.end_handoff();
        result
    }

    fn book_chunk(&mut self, chunk: &Chunk) -> Result<u32, UploadError> {
        let session_open = matches!(
            self.session.state,
            SessionState::SessionOpen | SessionState::Uploading
        );
        if !session_open {
            return Err(UploadError::Internal(format!(
                "chunk arrived while session is {}",
                self.session.state
            )));
        }

        let part_number = self.session.chunk_count + 1;
        if chunk.part_number != part_number {
            return Err(UploadError::Internal(format!(
                "chunk {} arrived out of sequence, expected {}",
                chunk.part_number, part_number
            )));
        }

        let observed = self.session.bytes_observed + chunk.len() as u64;
        if observed > self.settings.max_upload_size {
            return Err(UploadError::TooLarge {
                size: observed,
                max: self.settings.max_upload_size,
            });
        }

        self.transition(SessionState::Uploading)?;
        self.session.chunk_count = part_number;
        self.session.bytes_observed = observed;
        Ok(part_number)
    }

    fn spawn_part(&mut self, part_number: u32, data: Bytes, permit: OwnedSemaphorePermit) {
        let size = data.len() as u64;
        info!(
            "Uploading part {} of [ {} ] ({} bytes)",
            part_number, self.session.filename, size
        );

        let transport = Arc::clone(&self.transport);
        let bucket = self.settings.bucket.clone();
        let key = self.key.clone();
        let session_id = self.session.session_id.clone().unwrap_or_default();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let result = transport
                .upload_part(&bucket, &key, &session_id, part_number, data)
                .await;
            match &result {
                Ok(etag) => debug!("Uploaded part {} of [ {} ] etag={}", part_number, key, etag),
                Err(e) => warn!("Part {} of [ {} ] failed: {}", part_number, key, e),
            }
            result
        });

        self.session.pending_parts.push(PendingPart {
            part_number,
            size,
            handle,
        });
    }

    /// Await every pending part and complete the session, or abort it when
    /// any part failed.
    pub async fn finalize(mut self) -> Result<FinalUploadInfo, UploadError> {
        self.transition(SessionState::Finalizing)?;

        let pending = std::mem::take(&mut self.session.pending_parts);
        let results = join_all(
            pending
                .into_iter()
                .map(|p| async move { (p.part_number, p.handle.await) }),
        )
        .await;

        let mut completed = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (part_number, joined) in results {
            match joined {
                Ok(Ok(etag)) => completed.push(CompletedPart { part_number, etag }),
                Ok(Err(e)) => failures.push(PartFailure {
                    part_number,
                    error: e.to_string(),
                }),
                Err(e) => failures.push(PartFailure {
                    part_number,
                    error: format!("upload task failed: {}", e),
                }),
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.part_number);
            return Err(self.abort_with(UploadError::PartUpload { failures }).await);
        }

        completed.sort_by_key(|p| p.part_number);
        if let Err(e) = check_part_sequence(&completed, self.session.chunk_count) {
            return Err(self.abort_with(e).await);
        }
        self.session.completed_parts = completed;

        if self.session.chunk_count == 0 {
            return self.finalize_empty().await;
        }

        let session_id = self.session.session_id.clone().unwrap_or_default();
        if let Err(e) = self
            .transport
            .complete_session(
                &self.settings.bucket,
                &self.key,
                &session_id,
                &self.session.completed_parts,
            )
            .await
        {
            return Err(self.abort_with(UploadError::Finalize(e)).await);
        }

        self.transition(SessionState::Completed)?;
        info!(
            "Upload of [ {} ] is completed! ({} parts, {} bytes)",
            self.session.filename,
            self.session.chunk_count,
            self.session.final_size()
        );
        Ok(self.session.to_final_info())
    }

    /// A multipart session cannot be completed without parts, so an empty
    /// file is written with a single-shot put and the session is dropped.
    async fn finalize_empty(mut self) -> Result<FinalUploadInfo, UploadError> {
        if let Some(session_id) = self.session.session_id.take() {
            if let Err(e) = self
                .transport
                .abort_session(&self.settings.bucket, &self.key, &session_id)
                .await
            {
                warn!(
                    "Failed to abort empty session {} for {}, orphaned session may remain: {}",
                    session_id, self.key, e
                );
            }
        }

        self.transport
            .put_object(&self.settings.bucket, &self.key, Bytes::new())
            .await
            .map_err(UploadError::Finalize)?;

        self.transition(SessionState::Completed)?;
        info!(
            "Upload of [ {} ] is completed! (empty file, single-shot put)",
            self.session.filename
        );
        Ok(self.session.to_final_info())
    }

    /// Abort the remote session. Not retried.
    pub async fn abort(&mut self) -> Result<(), UploadError> {
        let Some(session_id) = self.session.session_id.clone() else {
            return Ok(());
        };
        self.transport
            .abort_session(&self.settings.bucket, &self.key, &session_id)
            .await
            .map_err(UploadError::Finalize)?;
        self.transition(SessionState::Aborted)?;
        info!("Aborted upload of [ {} ] session={}", self.session.filename, session_id);
        Ok(())
    }

    /// Abort, log if that fails too, and hand back the original error.
    async fn abort_with(&mut self, err: UploadError) -> UploadError {
        warn!("Upload of [ {} ] failed: {}", self.session.filename, err);
        if let Err(abort_err) = self.abort().await {
            warn!(
                "Failed to abort session for [ {} ]: {}",
                self.session.filename, abort_err
            );
        }
        self.session.state = SessionState::Aborted;
        err
    }

    /// Failure while still reading: let outstanding parts settle, then abort.
    async fn fail(&mut self, err: UploadError) -> UploadError {
        let pending = std::mem::take(&mut self.session.pending_parts);
        if !pending.is_empty() {
            debug!(
                "Waiting for {} in-flight parts before abort",
                pending.len()
            );
            join_all(pending.into_iter().map(|p| p.handle)).await;
        }
        self.end_handoff();
        self.abort_with(err).await
    }

    fn transition(&mut self, next: SessionState) -> Result<(), UploadError> {
        if !self.session.state.can_transition_to(next) {
            return Err(UploadError::Internal(format!(
                "invalid session transition {} -> {}",
                self.session.state, next
            )));
        }
        self.session.state = next;
        Ok(())
    }
}

/// Part numbers must be exactly 1..=expected, ascending, without repeats.
fn check_part_sequence(parts: &[CompletedPart], expected: u32) -> Result<(), UploadError> {
    if parts.len() != expected as usize {
        return Err(UploadError::Internal(format!(
            "expected {} acknowledged parts, got {}",
            expected,
            parts.len()
        )));
    }
    for (i, part) in parts.iter().enumerate() {
        if part.part_number != i as u32 + 1 {
            return Err(UploadError::Internal(format!(
                "part sequence broken at position {}: got part {}",
                i + 1,
                part.part_number
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTransport;
    use futures::stream;
    use std::io;

    fn settings() -> RelaySettings {
        RelaySettings {
            bucket: "bucket".to_string(),
            ..RelaySettings::default()
        }
    }

    fn coordinator(transport: Arc<MemoryTransport>, metadata: &str) -> PartUploadCoordinator {
        PartUploadCoordinator::new(transport, settings(), "file.bin".to_string(), 0, metadata)
    }

    fn frames(sizes: &[usize]) -> Vec<Result<Bytes, io::Error>> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| Ok(Bytes::from(vec![i as u8; n])))
            .collect()
    }

    #[test]
    fn test_key_uses_namespace_field() {
        let transport = Arc::new(MemoryTransport::new());
        let coord = coordinator(transport, r#"{"client":"c0ffee","city":"Porto"}"#);
        assert_eq!(coord.key(), "c0ffee/file.bin");
        assert_eq!(coord.session().state, SessionState::Created);
        assert!(coord.session().session_id.is_none());
    }

    #[test]
    fn test_key_with_root() {
        let transport = Arc::new(MemoryTransport::new());
        let settings = RelaySettings {
            key_root: Some("main".to_string()),
            ..settings()
        };
        let coord = PartUploadCoordinator::new(
            transport,
            settings,
            "heat.png".to_string(),
            0,
            r#"{"client":7}"#,
        );
        assert_eq!(coord.key(), "main/7/heat.png");
    }

    #[test]
    fn test_handoff_guard_rejects_reentry() {
        let transport = Arc::new(MemoryTransport::new());
        let mut coord = coordinator(transport, "{}");
        coord.begin_handoff().unwrap();
        assert!(matches!(coord.begin_handoff(), Err(UploadError::Internal(_))));
        coord.end_handoff();
        coord.begin_handoff().unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_before_begin_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let mut coord = coordinator(transport, "{}");
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();
        let chunk = Chunk {
            part_number: 1,
            data: Bytes::from_static(b"x"),
        };
        assert!(matches!(
            coord.dispatch_part(chunk, permit),
            Err(UploadError::Internal(_))
        ));
        assert!(!coord.session().dispatch_in_flight);
    }

    #[tokio::test]
    async fn test_out_of_sequence_chunk_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let mut coord = coordinator(transport, "{}");
        coord.begin().await.unwrap();
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();
        let chunk = Chunk {
            part_number: 2,
            data: Bytes::from_static(b"x"),
        };
        assert!(coord.dispatch_part(chunk, permit).is_err());
        assert_eq!(coord.session().chunk_count, 0);
        assert!(!coord.session().dispatch_in_flight);
    }

    #[tokio::test]
    async fn test_run_relays_small_chunks() {
        let transport = Arc::new(MemoryTransport::new());
        let coord = coordinator(Arc::clone(&transport), "{}");
        let reader = ChunkReader::with_max_chunk_size(stream::iter(frames(&[5, 5, 3])), 4);

        let info = coord.run(reader).await.unwrap();
        assert_eq!(info.chunks, 4);
        assert_eq!(info.size, 13);
        let numbers: Vec<u32> = info.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);

        let stored = transport.get_object("bucket", "file.bin").unwrap();
        assert_eq!(stored.data.len(), 13);
        assert!(transport.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_declared_size_too_large_fails_before_begin() {
        let transport = Arc::new(MemoryTransport::new());
        let settings = RelaySettings {
            max_upload_size: 10,
            ..settings()
        };
        let coord = PartUploadCoordinator::new(
            Arc::clone(&transport) as Arc<dyn MultipartTransport>,
            settings,
            "big.bin".to_string(),
            11,
            "{}",
        );
        let reader = ChunkReader::new(stream::iter(frames(&[11])));
        let err = coord.run(reader).await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { size: 11, max: 10 }));
        assert!(transport.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_observed_size_too_large_aborts() {
        let transport = Arc::new(MemoryTransport::new());
        let settings = RelaySettings {
            max_upload_size: 10,
            ..settings()
        };
        let coord = PartUploadCoordinator::new(
            Arc::clone(&transport) as Arc<dyn MultipartTransport>,
            settings,
            "big.bin".to_string(),
            0,
            "{}",
        );
        let reader = ChunkReader::with_max_chunk_size(stream::iter(frames(&[6, 6])), 6);
        let err = coord.run(reader).await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { size: 12, max: 10 }));
        assert!(transport.list_sessions().is_empty());
        assert!(transport.get_object("bucket", "big.bin").is_none());
    }

    #[test]
    fn test_part_sequence_check() {
        let part = |n| CompletedPart {
            part_number: n,
            etag: "e".to_string(),
        };
        assert!(check_part_sequence(&[part(1), part(2), part(3)], 3).is_ok());
        assert!(check_part_sequence(&[], 0).is_ok());
        assert!(check_part_sequence(&[part(1), part(3)], 2).is_err());
        assert!(check_part_sequence(&[part(1), part(1)], 2).is_err());
        assert!(check_part_sequence(&[part(1)], 2).is_err());
    }

    #[test]
    fn test_part_upload_error_lists_failures() {
        let err = UploadError::PartUpload {
            failures: vec![
                PartFailure {
                    part_number: 2,
                    error: "boom".to_string(),
                },
                PartFailure {
                    part_number: 5,
                    error: "reset".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 part upload(s) failed: part 2: boom; part 5: reset"
        );
    }
}
