//! In-memory multipart transport
//!
//! Keeps sessions and finished objects in process memory with S3-like
//! semantics (MD5 part ETags, ordered completion, composite ETag). Used as the
//! development backend and as a test double. Everything is lost on restart.

use super::traits::{MultipartTransport, SessionStart, TransportError};
use crate::types::{CompletedPart, ResponseMetadata};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// S3 accepts part numbers 1..=10000
const MAX_PART_NUMBER: u32 = 10_000;

struct PartData {
    data: Bytes,
    md5_hex: String,
    md5_raw: [u8; 16],
}

struct Session {
    bucket: String,
    key: String,
    created_at: DateTime<Utc>,
    parts: HashMap<u32, PartData>,
}

/// A finished object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub stored_at: DateTime<Utc>,
}

/// An open session, as reported by `list_sessions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub session_id: String,
    pub bucket: String,
    pub key: String,
    pub parts: usize,
}

/// Thread-safe in-memory multipart transport
#[derive(Default)]
pub struct MemoryTransport {
    sessions: RwLock<HashMap<String, Session>>,
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a finished object.
    pub fn get_object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Sessions that were begun but neither completed nor aborted.
    pub fn list_sessions(&self) -> Vec<OpenSession> {
        let sessions = self.sessions.read();
        let mut open: Vec<(DateTime<Utc>, OpenSession)> = sessions
            .iter()
            .map(|(id, s)| {
                (
                    s.created_at,
                    OpenSession {
                        session_id: id.clone(),
                        bucket: s.bucket.clone(),
                        key: s.key.clone(),
                        parts: s.parts.len(),
                    },
                )
            })
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.key.cmp(&b.1.key)));
        open.into_iter().map(|(_, s)| s).collect()
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        bucket: &str,
        key: &str,
        f: impl FnOnce(&mut Session) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| TransportError::NoSuchSession(session_id.to_string()))?;

        // Validate bucket+key match
        if session.bucket != bucket || session.key != key {
            return Err(TransportError::NoSuchSession(session_id.to_string()));
        }
        f(session)
    }
}

#[async_trait]
impl MultipartTransport for MemoryTransport {
    async fn begin_session(&self, bucket: &str, key: &str) -> Result<SessionStart, TransportError> {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.write().insert(
            session_id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                created_at: Utc::now(),
                parts: HashMap::new(),
            },
        );
        debug!("memory: begin {}/{} session={}", bucket, key, session_id);
        Ok(SessionStart {
            session_id,
            response_metadata: ResponseMetadata::default(),
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(TransportError::InvalidPart(format!(
                "Part number must be between 1 and {}",
                MAX_PART_NUMBER
            )));
        }

        let md5_raw: [u8; 16] = Md5::digest(&body).into();
        let md5_hex = hex::encode(md5_raw);
        let etag = format!("\"{}\"", md5_hex);

        self.with_session(session_id, bucket, key, |session| {
            // Re-uploading the same part number replaces the previous data
            session.parts.insert(
                part_number,
                PartData {
                    data: body,
                    md5_hex,
                    md5_raw,
                },
            );
            Ok(())
        })?;

        Ok(etag)
    }

    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError> {
        if parts.is_empty() {
            return Err(TransportError::InvalidPart(
                "You must specify at least one part".to_string(),
            ));
        }
        for window in parts.windows(2) {
            if window[0].part_number >= window[1].part_number {
                return Err(TransportError::InvalidPartOrder);
            }
        }

        let (data, etag) = self.with_session(session_id, bucket, key, |session| {
            let mut md5_concat = Vec::with_capacity(parts.len() * 16);
            let mut assembled = BytesMut::new();

            for part in parts {
                let stored = session.parts.get(&part.part_number).ok_or_else(|| {
                    TransportError::InvalidPart(format!(
                        "Part {} has not been uploaded",
                        part.part_number
                    ))
                })?;
                if part.etag.trim_matches('"') != stored.md5_hex {
                    return Err(TransportError::InvalidPart(format!(
                        "ETag mismatch for part {}",
                        part.part_number
                    )));
                }
                md5_concat.extend_from_slice(&stored.md5_raw);
                assembled.extend_from_slice(&stored.data);
            }

            // S3-compatible multipart ETag: MD5(concat of part MD5 raw bytes)-N
            let etag = format!(
                "\"{}-{}\"",
                hex::encode(Md5::digest(&md5_concat)),
                parts.len()
            );
            Ok((assembled.freeze(), etag))
        })?;

        self.sessions.write().remove(session_id);
        debug!(
            "memory: complete {}/{} ({} parts, {} bytes)",
            bucket,
            key,
            parts.len(),
            data.len()
        );
        self.objects.write().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                etag,
                stored_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> Result<(), TransportError> {
        self.with_session(session_id, bucket, key, |_| Ok(()))?;
        self.sessions.write().remove(session_id);
        debug!("memory: abort {}/{} session={}", bucket, key, session_id);
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), TransportError> {
        let etag = format!("\"{}\"", hex::encode(Md5::digest(&body)));
        self.objects.write().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: body,
                etag,
                stored_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(part_number: u32, etag: String) -> CompletedPart {
        CompletedPart { part_number, etag }
    }

    #[tokio::test]
    async fn test_complete_roundtrip() {
        let store = MemoryTransport::new();
        let id = store.begin_session("bucket", "key.bin").await.unwrap().session_id;

        let etag1 = store
            .upload_part("bucket", "key.bin", &id, 1, Bytes::from(vec![1u8; 100]))
            .await
            .unwrap();
        let etag2 = store
            .upload_part("bucket", "key.bin", &id, 2, Bytes::from(vec![2u8; 200]))
            .await
            .unwrap();
        assert!(etag1.starts_with('"') && etag1.ends_with('"'));

        store
            .complete_session("bucket", "key.bin", &id, &[part(1, etag1), part(2, etag2)])
            .await
            .unwrap();

        let obj = store.get_object("bucket", "key.bin").unwrap();
        assert_eq!(obj.data.len(), 300);
        assert_eq!(&obj.data[..100], &[1u8; 100]);
        assert_eq!(&obj.data[100..], &[2u8; 200]);
        assert!(obj.etag.ends_with("-2\""));
        assert!(store.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_abort_discards_session() {
        let store = MemoryTransport::new();
        let id = store.begin_session("bucket", "key.bin").await.unwrap().session_id;
        assert_eq!(store.list_sessions().len(), 1);

        store.abort_session("bucket", "key.bin", &id).await.unwrap();
        assert!(store.list_sessions().is_empty());

        let result = store
            .upload_part("bucket", "key.bin", &id, 1, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(TransportError::NoSuchSession(_))));
    }

    #[tokio::test]
    async fn test_bucket_key_mismatch() {
        let store = MemoryTransport::new();
        let id = store.begin_session("bucket-a", "key.bin").await.unwrap().session_id;

        let result = store
            .upload_part("bucket-b", "key.bin", &id, 1, Bytes::from_static(b"x"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_part_number() {
        let store = MemoryTransport::new();
        let id = store.begin_session("bucket", "key.bin").await.unwrap().session_id;

        for n in [0, MAX_PART_NUMBER + 1] {
            let result = store
                .upload_part("bucket", "key.bin", &id, n, Bytes::from_static(b"x"))
                .await;
            assert!(matches!(result, Err(TransportError::InvalidPart(_))));
        }
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_and_unordered() {
        let store = MemoryTransport::new();
        let id = store.begin_session("bucket", "key.bin").await.unwrap().session_id;
        let e1 = store
            .upload_part("bucket", "key.bin", &id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();
        let e2 = store
            .upload_part("bucket", "key.bin", &id, 2, Bytes::from_static(b"b"))
            .await
            .unwrap();

        let empty = store.complete_session("bucket", "key.bin", &id, &[]).await;
        assert!(matches!(empty, Err(TransportError::InvalidPart(_))));

        let unordered = store
            .complete_session("bucket", "key.bin", &id, &[part(2, e2), part(1, e1)])
            .await;
        assert!(matches!(unordered, Err(TransportError::InvalidPartOrder)));
        assert_eq!(store.list_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_rejects_wrong_etag() {
        let store = MemoryTransport::new();
        let id = store.begin_session("bucket", "key.bin").await.unwrap().session_id;
        store
            .upload_part("bucket", "key.bin", &id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();

        let result = store
            .complete_session("bucket", "key.bin", &id, &[part(1, "\"bogus\"".into())])
            .await;
        assert!(matches!(result, Err(TransportError::InvalidPart(_))));
    }

    #[tokio::test]
    async fn test_put_object() {
        let store = MemoryTransport::new();
        store
            .put_object("bucket", "empty.bin", Bytes::new())
            .await
            .unwrap();
        let obj = store.get_object("bucket", "empty.bin").unwrap();
        assert!(obj.data.is_empty());
        assert_eq!(obj.etag, "\"d41d8cd98f00b204e9800998ecf8427e\"");
    }
}
