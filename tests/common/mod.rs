//! Shared test infrastructure for integration tests
//!
//! Provides ScriptedTransport, a recording transport with per-part failure
//! and delay injection, plus byte-source helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use partrelay::storage::{MultipartTransport, SessionStart, TransportError};
use partrelay::types::{CompletedPart, ResponseMetadata};
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_ID: &str = "session-1";
pub const REQUEST_ID: &str = "req-1";

/// One observed interaction, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin { key: String },
    PartStarted(u32),
    PartFinished(u32),
    Complete(Vec<u32>),
    Abort,
    PutObject { size: usize },
    /// The byte source handed out its n-th frame
    Pulled(u32),
}

/// Transport double that records every call and fails on request.
#[derive(Default)]
pub struct ScriptedTransport {
    events: Mutex<Vec<Event>>,
    failing_parts: HashSet<u32>,
    part_delays: HashMap<u32, Duration>,
    fail_begin: bool,
    fail_complete: bool,
    fail_abort: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ──

    pub fn with_failing_part(mut self, part_number: u32) -> Self {
        self.failing_parts.insert(part_number);
        self
    }

    pub fn with_part_delay(mut self, part_number: u32, millis: u64) -> Self {
        self.part_delays
            .insert(part_number, Duration::from_millis(millis));
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    // ── Inspection ──

    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|&e| pred(e)).count()
    }

    pub fn aborts(&self) -> usize {
        self.count(|e| matches!(e, Event::Abort))
    }

    pub fn completes(&self) -> Vec<Vec<u32>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Complete(parts) => Some(parts.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn started_parts(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::PartStarted(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    /// Position of the first matching event
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

#[async_trait]
impl MultipartTransport for ScriptedTransport {
    async fn begin_session(&self, _bucket: &str, key: &str) -> Result<SessionStart, TransportError> {
        self.record(Event::Begin {
            key: key.to_string(),
        });
        if self.fail_begin {
            return Err(TransportError::S3("AccessDenied".to_string()));
        }
        Ok(SessionStart {
            session_id: SESSION_ID.to_string(),
            response_metadata: ResponseMetadata {
                request_id: Some(REQUEST_ID.to_string()),
                extended_request_id: None,
            },
        })
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        session_id: &str,
        part_number: u32,
        _body: Bytes,
    ) -> Result<String, TransportError> {
        assert_eq!(session_id, SESSION_ID);
        self.record(Event::PartStarted(part_number));
        if let Some(delay) = self.part_delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        }
        self.record(Event::PartFinished(part_number));
        if self.failing_parts.contains(&part_number) {
            return Err(TransportError::S3(format!(
                "connection reset on part {}",
                part_number
            )));
        }
        Ok(format!("etag-{}", part_number))
    }

    async fn complete_session(
        &self,
        _bucket: &str,
        _key: &str,
        _session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError> {
        self.record(Event::Complete(
            parts.iter().map(|p| p.part_number).collect(),
        ));
        for part in parts {
            assert_eq!(part.etag, format!("etag-{}", part.part_number));
        }
        if self.fail_complete {
            return Err(TransportError::S3("InternalError".to_string()));
        }
        Ok(())
    }

    async fn abort_session(
        &self,
        _bucket: &str,
        _key: &str,
        _session_id: &str,
    ) -> Result<(), TransportError> {
        self.record(Event::Abort);
        if self.fail_abort {
            return Err(TransportError::S3("ServiceUnavailable".to_string()));
        }
        Ok(())
    }

    async fn put_object(&self, _bucket: &str, _key: &str, body: Bytes) -> Result<(), TransportError> {
        self.record(Event::PutObject { size: body.len() });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ── Byte sources ──

pub type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// A frame of `len` bytes, every byte set to `fill`
pub fn frame(len: usize, fill: u8) -> Bytes {
    Bytes::from(vec![fill; len])
}

/// Source that yields `frames` in order and then ends
pub fn source(frames: Vec<Bytes>) -> ByteSource {
    Box::pin(stream::iter(frames.into_iter().map(Ok::<Bytes, io::Error>)))
}

/// Source that yields `frames` and then fails
pub fn failing_source(frames: Vec<Bytes>) -> ByteSource {
    let items: Vec<Result<Bytes, io::Error>> = frames
        .into_iter()
        .map(Ok)
        .chain(std::iter::once(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "client went away",
        ))))
        .collect();
    Box::pin(stream::iter(items))
}

/// Source that records `Event::Pulled(n)` on the transport each time it
/// hands out frame n
pub fn recorded_source(transport: Arc<ScriptedTransport>, frames: Vec<Bytes>) -> ByteSource {
    let state = (frames.into_iter().enumerate(), transport);
    Box::pin(stream::unfold(state, |(mut frames, transport)| async move {
        let (i, frame) = frames.next()?;
        transport.record(Event::Pulled(i as u32 + 1));
        Some((Ok::<Bytes, io::Error>(frame), (frames, transport)))
    }))
}
