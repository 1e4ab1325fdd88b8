//! Unbounded byte streams of unknown length
//!
//! A background pump reads the live stream into a bounded channel of
//! chunks, so reading ahead never waits on the consumer of the current part.
//! Short reads are coalesced into chunks of [`READ_CHUNK_SIZE`] bytes, which
//! keeps the channel's byte bound independent of how the reader behaves. The
//! adapter first buffers chunks until the large-file threshold is reached or
//! the stream ends:
//!
//! - ended early: a direct source replaying the buffered chunks
//! - threshold reached: a [`StreamPartitioner`] that continues from the
//!   buffered chunks and cuts the rest of the stream into parts of exactly
//!   `part_size` bytes
//!
//! ```text
//!  reader ──▶ pump task ──▶ [bounded channel] ──▶ lookahead ──▶ Direct
//!                                                     │
//!                                                     └──▶ StreamPartitioner ──▶ Part 1, 2, ..
//! ```

use super::{bytes_stream, DirectSource, Part, PartitionedSource, SourceAdapter, READ_CHUNK_SIZE};
use crate::api::ReadStream;
use crate::error::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default minimum read-ahead between the live stream and the partitioner
pub const DEFAULT_LOOKAHEAD_FLOOR: u64 = 1024 * 1024;

/// Tuning for stream sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAdapterOptions {
    /// The read-ahead stage holds `max(part_size, lookahead_floor)` bytes
    pub lookahead_floor: u64,
}

impl Default for StreamAdapterOptions {
    fn default() -> Self {
        Self {
            lookahead_floor: DEFAULT_LOOKAHEAD_FLOOR,
        }
    }
}

impl StreamAdapterOptions {
    /// Number of chunks the read-ahead channel holds for `part_size`
    ///
    /// Every chunk but the last is exactly [`READ_CHUNK_SIZE`] bytes.
    fn channel_capacity(&self, part_size: u64) -> usize {
        let bytes = part_size.max(self.lookahead_floor);
        let chunks = bytes.div_ceil(READ_CHUNK_SIZE as u64);
        usize::try_from(chunks).unwrap_or(usize::MAX).max(1)
    }
}

pub(super) async fn adapt(
    reader: Box<dyn AsyncRead + Unpin + Send>,
    part_size: u64,
    threshold: u64,
    options: &StreamAdapterOptions,
) -> Result<SourceAdapter> {
    let mut feed = ChunkFeed::spawn(reader, options.channel_capacity(part_size));
    let mut buffered = VecDeque::new();
    let mut total: u64 = 0;

    while total < threshold {
        let next = feed.next().await;
        match next {
            Some(Ok(chunk)) => {
                total += chunk.len() as u64;
                buffered.push_back(chunk);
            }
            Some(Err(e)) => {
                feed.shutdown().await;
                return Err(e.into());
            }
            None => break,
        }
    }

    if total < threshold {
        debug!(size = total, "stream ended below threshold, sending directly");
        feed.shutdown().await;
        return Ok(SourceAdapter::Direct(Box::new(BufferedStream {
            chunks: buffered.into(),
            size: total,
        })));
    }

    debug!(buffered = total, part_size, "stream reached threshold, partitioning");
    Ok(SourceAdapter::Partitioned(Box::new(StreamPartitioner {
        feed: Some(feed),
        pending: buffered,
        assembling: BytesMut::new(),
        part_size,
        next_number: 1,
    })))
}

/// Receiving end of the pump task
struct ChunkFeed {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    pump: JoinHandle<()>,
}

impl ChunkFeed {
    fn spawn(mut reader: Box<dyn AsyncRead + Unpin + Send>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let pump = tokio::spawn(async move {
            loop {
                let (chunk, ended) = match read_chunk(&mut reader).await {
                    Ok(read) => read,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                if !chunk.is_empty() && tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                if ended {
                    return;
                }
            }
        });
        Self { chunks: rx, pump }
    }

    async fn next(&mut self) -> Option<io::Result<Bytes>> {
        self.chunks.recv().await
    }

    /// Stop the pump and wait until it has dropped the reader
    async fn shutdown(self) {
        self.pump.abort();
        let _ = self.pump.await;
    }
}

/// Fill one chunk of [`READ_CHUNK_SIZE`] bytes, short only at end of stream
async fn read_chunk(reader: &mut (dyn AsyncRead + Unpin + Send)) -> io::Result<(Bytes, bool)> {
    let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
    while chunk.len() < READ_CHUNK_SIZE {
        let mut limited = (&mut *reader).take((READ_CHUNK_SIZE - chunk.len()) as u64);
        if limited.read_buf(&mut chunk).await? == 0 {
            return Ok((chunk.freeze(), true));
        }
    }
    Ok((chunk.freeze(), false))
}

/// A short stream, fully buffered during lookahead
struct BufferedStream {
    chunks: Vec<Bytes>,
    size: u64,
}

#[async_trait]
impl DirectSource for BufferedStream {
    async fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    async fn open(&self) -> io::Result<ReadStream> {
        Ok(bytes_stream(self.chunks.clone()))
    }

    async fn destroy(&mut self) {
        self.chunks.clear();
    }
}

/// Cuts a live stream into fixed-size, hashed parts
///
/// `pending` holds bytes read but not yet assigned to a part: first the
/// lookahead buffer, later whatever overflowed the previous part boundary.
/// `assembling` holds the part being filled, so a dropped `next_part`
/// resumes where it stopped.
pub struct StreamPartitioner {
    feed: Option<ChunkFeed>,
    pending: VecDeque<Bytes>,
    assembling: BytesMut,
    part_size: u64,
    next_number: u32,
}

impl StreamPartitioner {
    /// Next chunk of unassigned bytes, pending ones first
    async fn pull(&mut self) -> Option<io::Result<Bytes>> {
        if let Some(chunk) = self.pending.pop_front() {
            return Some(Ok(chunk));
        }
        match self.feed.as_mut() {
            Some(feed) => feed.next().await,
            None => None,
        }
    }
}

#[async_trait]
impl PartitionedSource for StreamPartitioner {
    async fn next_part(&mut self) -> Result<Option<Part>> {
        let want = usize::try_from(self.part_size).unwrap_or(usize::MAX);

        while self.assembling.len() < want {
            let mut chunk = match self.pull().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(e.into()),
                None => break,
            };

            let room = want - self.assembling.len();
            if chunk.len() > room {
                let rest = chunk.split_off(room);
                self.pending.push_front(rest);
            }
            self.assembling.extend_from_slice(&chunk);
        }

        if self.assembling.is_empty() {
            return Ok(None);
        }

        let number = self.next_number;
        self.next_number += 1;
        let data = self.assembling.split().freeze();
        Ok(Some(Part::from_bytes(number, data)))
    }

    async fn destroy(&mut self) {
        self.pending.clear();
        self.assembling.clear();
        if let Some(feed) = self.feed.take() {
            feed.shutdown().await;
        }
    }
}
