//! Source adapters
//!
//! Every upload source is normalized into one of two shapes before any
//! network traffic happens:
//!
//! - [`DirectSource`]: the whole payload, sent in one request. It reports a
//!   size and can be opened any number of times (once for hashing, once per
//!   upload attempt).
//! - [`PartitionedSource`]: a pull-based sequence of numbered, hashed
//!   [`Part`]s for the large-file protocol. `next_part` takes `&mut self`, so
//!   parts are produced strictly one at a time while already produced parts
//!   upload concurrently.
//!
//! Buffers and files know their size up front. Streams are read ahead until
//! the large-file threshold is reached or the stream ends, see [`stream`].

mod buffer;
mod file;
pub mod stream;

pub use stream::StreamAdapterOptions;

use crate::api::ReadStream;
use crate::error::Result;
use crate::upload::hasher::sha1_hex;
use crate::upload::request::UploadSource;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// One numbered, hashed chunk of a large file
///
/// Cloning is cheap: in-memory data is reference counted and file-backed
/// parts only remember their byte range.
#[derive(Clone)]
pub struct Part {
    /// 1-based part number
    pub number: u32,
    /// Hex SHA-1 of the part's bytes
    pub sha1: String,
    /// Part length in bytes
    pub len: u64,
    body: PartBody,
}

#[derive(Clone)]
enum PartBody {
    Memory(Bytes),
    FileRange { path: Arc<PathBuf>, offset: u64 },
}

impl Part {
    /// A part held in memory, hashed on construction
    pub fn from_bytes(number: u32, data: Bytes) -> Self {
        Self {
            number,
            sha1: sha1_hex(&data),
            len: data.len() as u64,
            body: PartBody::Memory(data),
        }
    }

    /// A part backed by `[offset, offset + len)` of a file, already hashed
    pub(crate) fn file_range(
        number: u32,
        path: Arc<PathBuf>,
        offset: u64,
        len: u64,
        sha1: String,
    ) -> Self {
        Self {
            number,
            sha1,
            len,
            body: PartBody::FileRange { path, offset },
        }
    }

    /// Open a fresh, independent reader over the part's bytes
    pub async fn open(&self) -> io::Result<ReadStream> {
        match &self.body {
            PartBody::Memory(data) => Ok(bytes_stream(vec![data.clone()])),
            PartBody::FileRange { path, offset } => {
                file::open_range(path.as_path(), *offset, self.len).await
            }
        }
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("number", &self.number)
            .field("sha1", &self.sha1)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Whole-payload source for a single-request upload
#[async_trait]
pub trait DirectSource: Send + Sync {
    /// Payload size in bytes
    async fn size(&self) -> Result<u64>;

    /// A fresh reader over the whole payload
    async fn open(&self) -> io::Result<ReadStream>;

    /// Release held resources
    async fn destroy(&mut self);
}

/// Pull-based producer of large-file parts
#[async_trait]
pub trait PartitionedSource: Send {
    /// The next part, or `None` once the source is exhausted
    ///
    /// Cancel safe: dropping the future before it completes loses no bytes,
    /// and the next call resumes the same part.
    async fn next_part(&mut self) -> Result<Option<Part>>;

    /// Release held resources; no parts are produced afterwards
    async fn destroy(&mut self);
}

/// A source normalized to the shape the orchestrator will drive
pub enum SourceAdapter {
    Direct(Box<dyn DirectSource>),
    Partitioned(Box<dyn PartitionedSource>),
}

impl SourceAdapter {
    /// Build the adapter for `source`
    ///
    /// Sources of at least `threshold` bytes are partitioned into parts of
    /// `part_size` bytes, smaller ones are sent directly. Stream sources are
    /// read until that decision can be made.
    pub async fn open(
        source: UploadSource,
        part_size: u64,
        threshold: u64,
        options: &StreamAdapterOptions,
    ) -> Result<Self> {
        match source {
            UploadSource::Buffer(data) => Ok(buffer::adapt(data, part_size, threshold)),
            UploadSource::File(path) => file::adapt(path, part_size, threshold).await,
            UploadSource::Stream(reader) => {
                stream::adapt(reader, part_size, threshold, options).await
            }
        }
    }

    pub fn is_partitioned(&self) -> bool {
        matches!(self, SourceAdapter::Partitioned(_))
    }

    /// Release whatever the adapter holds
    pub async fn destroy(&mut self) {
        match self {
            SourceAdapter::Direct(source) => source.destroy().await,
            SourceAdapter::Partitioned(source) => source.destroy().await,
        }
    }
}

impl fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceAdapter::Direct(_) => f.write_str("SourceAdapter::Direct"),
            SourceAdapter::Partitioned(_) => f.write_str("SourceAdapter::Partitioned"),
        }
    }
}

/// Replay in-memory chunks as a [`ReadStream`]
pub(crate) fn bytes_stream(chunks: Vec<Bytes>) -> ReadStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Bytes per read when streaming from files and readers
pub(crate) const READ_CHUNK_SIZE: usize = 64 * 1024;
