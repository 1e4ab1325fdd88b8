//! Caller-facing upload request and its validation

use crate::error::{Result, UploadError};
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncRead;

/// Smallest part size the service accepts
pub const MIN_PART_SIZE: u64 = 5_000_000;

/// Largest part size the service accepts
pub const MAX_PART_SIZE: u64 = 5_000_000_000;

/// Content type asking the service to guess from the file name
pub const DEFAULT_CONTENT_TYPE: &str = "b2/x-auto";

/// Parts uploaded at once unless configured otherwise
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Where the upload's bytes come from
pub enum UploadSource {
    /// Bytes already in memory
    Buffer(Bytes),
    /// A local file, read in byte ranges
    File(PathBuf),
    /// An unbounded stream of unknown length
    Stream(Box<dyn AsyncRead + Unpin + Send>),
}

impl UploadSource {
    /// Short name of the source kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            UploadSource::Buffer(_) => "buffer",
            UploadSource::File(_) => "file",
            UploadSource::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Buffer(data) => f.debug_tuple("Buffer").field(&data.len()).finish(),
            UploadSource::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        UploadSource::Buffer(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        UploadSource::Buffer(Bytes::from(data))
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::File(path)
    }
}

/// Values applied when a request leaves a setting unset
#[derive(Debug, Clone, PartialEq)]
pub struct UploadDefaults {
    pub part_size: Option<u64>,
    pub large_file_threshold: Option<u64>,
    pub concurrency: usize,
    pub content_type: String,
}

impl Default for UploadDefaults {
    fn default() -> Self {
        Self {
            part_size: None,
            large_file_threshold: None,
            concurrency: DEFAULT_CONCURRENCY,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// One upload as asked for by the caller
///
/// # Example
///
/// ```
/// use b2lift::upload::UploadRequest;
/// use bytes::Bytes;
///
/// let request = UploadRequest::new("bucket-id", "backups/db.tar", Bytes::from_static(b"..."))
///     .part_size(100_000_000)
///     .concurrency(4);
/// assert_eq!(request.file_name(), "backups/db.tar");
/// ```
#[derive(Debug)]
pub struct UploadRequest {
    bucket_id: String,
    file_name: String,
    source: UploadSource,
    part_size: Option<u64>,
    large_file_threshold: Option<u64>,
    concurrency: Option<usize>,
    content_type: Option<String>,
}

impl UploadRequest {
    /// Create a request with the required fields
    pub fn new(
        bucket_id: impl Into<String>,
        file_name: impl Into<String>,
        source: impl Into<UploadSource>,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            file_name: file_name.into(),
            source: source.into(),
            part_size: None,
            large_file_threshold: None,
            concurrency: None,
            content_type: None,
        }
    }

    /// Bytes per part of a large file
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Size at or above which the large-file protocol is used
    pub fn large_file_threshold(mut self, threshold: u64) -> Self {
        self.large_file_threshold = Some(threshold);
        self
    }

    /// Maximum number of parts in flight at once
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Content type recorded with the file
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Resolve defaults and check every constraint before any I/O happens
    pub fn validate(self, defaults: &UploadDefaults) -> Result<ValidatedRequest> {
        if self.bucket_id.trim().is_empty() {
            return Err(UploadError::Validation("bucket id is required".to_string()));
        }
        if self.file_name.is_empty() {
            return Err(UploadError::Validation("file name is required".to_string()));
        }

        let part_size = self
            .part_size
            .or(defaults.part_size)
            .ok_or_else(|| UploadError::Validation("part size is required".to_string()))?;

        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
            return Err(UploadError::Validation(format!(
                "part size {} is outside {}..={}",
                part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }

        let large_file_threshold = self
            .large_file_threshold
            .or(defaults.large_file_threshold)
            .unwrap_or(part_size.saturating_mul(2));

        if large_file_threshold <= part_size {
            return Err(UploadError::Validation(format!(
                "large file threshold {} must exceed part size {}",
                large_file_threshold, part_size
            )));
        }

        let concurrency = self.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(UploadError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let content_type = self
            .content_type
            .unwrap_or_else(|| defaults.content_type.clone());
        if content_type.is_empty() {
            return Err(UploadError::Validation("content type is empty".to_string()));
        }

        Ok(ValidatedRequest {
            bucket_id: self.bucket_id,
            file_name: self.file_name,
            content_type,
            part_size,
            large_file_threshold,
            concurrency,
            source: self.source,
        })
    }
}

/// A request whose settings are resolved and checked
#[derive(Debug)]
pub struct ValidatedRequest {
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    pub part_size: u64,
    pub large_file_threshold: u64,
    pub concurrency: usize,
    pub source: UploadSource,
}
