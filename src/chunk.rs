//! Bounded chunking of an inbound byte stream
//!
//! The reader only pulls from its source when the caller asks for the next
//! chunk, so a caller that finishes handing off one chunk before asking for
//! the next one gets backpressure for free: the source is never read ahead of
//! dispatch by more than one chunk.

use crate::types::MAX_CHUNK_SIZE;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use thiserror::Error;

/// Errors from the inbound byte stream
#[derive(Debug, Clone, Error)]
pub enum ChunkError {
    #[error("Source stream failed: {0}")]
    Source(String),
}

/// One bounded slice of the source, tagged with its 1-based part number
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    pub part_number: u32,
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("part_number", &self.part_number)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Splits a byte stream into chunks of at most `max_chunk_size` bytes.
///
/// Every chunk but the last is exactly `max_chunk_size` bytes long. The
/// sequence is single-pass: once the source ends (or fails) the reader is
/// fused and never yields again, even if the source would.
pub struct ChunkReader<S> {
    source: S,
    buffer: BytesMut,
    max_chunk_size: usize,
    chunks_read: u32,
    bytes_read: u64,
    source_done: bool,
}

impl<S, E> ChunkReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    pub fn new(source: S) -> Self {
        Self::with_max_chunk_size(source, MAX_CHUNK_SIZE)
    }

    pub(crate) fn with_max_chunk_size(source: S, max_chunk_size: usize) -> Self {
        Self {
            source,
            buffer: BytesMut::new(),
            max_chunk_size: max_chunk_size.max(1),
            chunks_read: 0,
            bytes_read: 0,
            source_done: false,
        }
    }

    /// Pull the next chunk. `Ok(None)` means end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ChunkError> {
        while !self.source_done && self.buffer.len() < self.max_chunk_size {
            match self.source.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    self.source_done = true;
                    self.buffer.clear();
                    return Err(ChunkError::Source(e.to_string()));
                }
                None => self.source_done = true,
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let take = self.buffer.len().min(self.max_chunk_size);
        let data = self.buffer.split_to(take).freeze();
        self.chunks_read += 1;
        self.bytes_read += data.len() as u64;

        Ok(Some(Chunk {
            part_number: self.chunks_read,
            data,
        }))
    }

    pub fn chunks_read(&self) -> u32 {
        self.chunks_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// True once the source has ended and every buffered byte was handed out.
    pub fn is_finished(&self) -> bool {
        self.source_done && self.buffer.is_empty()
    }
}
