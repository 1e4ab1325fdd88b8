//! Local files, read by byte range
//!
//! Each part is hashed in a first pass over its range and uploaded from a
//! second, independent open of the same range, so a part never has to sit
//! in memory.

use super::{DirectSource, Part, PartitionedSource, SourceAdapter, READ_CHUNK_SIZE};
use crate::api::ReadStream;
use crate::error::{Result, UploadError};
use crate::upload::hasher::hash_stream;
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

pub(super) async fn adapt(path: PathBuf, part_size: u64, threshold: u64) -> Result<SourceAdapter> {
    let size = regular_file_size(&path).await?;
    debug!(path = %path.display(), size, "opened file source");

    let path = Arc::new(path);
    if size >= threshold {
        Ok(SourceAdapter::Partitioned(Box::new(FilePartitioner {
            path: Some(path),
            size,
            part_size,
            offset: 0,
            next_number: 1,
        })))
    } else {
        Ok(SourceAdapter::Direct(Box::new(FileSource { path })))
    }
}

async fn regular_file_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(UploadError::NotAFile(path.to_path_buf()));
    }
    Ok(metadata.len())
}

/// Stream `len` bytes of `path` starting at `offset`
pub(super) async fn open_range(path: &Path, offset: u64, len: u64) -> io::Result<ReadStream> {
    let mut file = tokio::fs::File::open(path).await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    Ok(Box::pin(ReaderStream::with_capacity(
        file.take(len),
        READ_CHUNK_SIZE,
    )))
}

struct FileSource {
    path: Arc<PathBuf>,
}

#[async_trait]
impl DirectSource for FileSource {
    async fn size(&self) -> Result<u64> {
        regular_file_size(&self.path).await
    }

    async fn open(&self) -> io::Result<ReadStream> {
        open_range(&self.path, 0, u64::MAX).await
    }

    async fn destroy(&mut self) {}
}

struct FilePartitioner {
    path: Option<Arc<PathBuf>>,
    size: u64,
    part_size: u64,
    offset: u64,
    next_number: u32,
}

#[async_trait]
impl PartitionedSource for FilePartitioner {
    async fn next_part(&mut self) -> Result<Option<Part>> {
        let Some(path) = self.path.clone() else {
            return Ok(None);
        };
        if self.offset >= self.size {
            return Ok(None);
        }

        let len = self.part_size.min(self.size - self.offset);
        let (sha1, hashed) = hash_stream(open_range(&path, self.offset, len).await?).await?;
        if hashed != len {
            return Err(UploadError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} shrank while reading part {}: expected {} bytes at offset {}, got {}",
                    path.display(),
                    self.next_number,
                    len,
                    self.offset,
                    hashed
                ),
            )));
        }

        let part = Part::file_range(self.next_number, path, self.offset, len, sha1);
        self.offset += len;
        self.next_number += 1;
        Ok(Some(part))
    }

    async fn destroy(&mut self) {
        self.path = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::hasher::sha1_hex;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = adapt(dir.path().to_path_buf(), 10, 20).await.unwrap_err();
        assert!(matches!(err, UploadError::NotAFile(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = adapt(dir.path().join("missing"), 10, 20).await.unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[tokio::test]
    async fn test_direct_file() {
        let file = temp_file(b"hello world");
        let SourceAdapter::Direct(source) = adapt(file.path().to_path_buf(), 10, 20).await.unwrap()
        else {
            panic!("expected a direct source");
        };

        assert_eq!(source.size().await.unwrap(), 11);
        let (digest, len) = hash_stream(source.open().await.unwrap()).await.unwrap();
        assert_eq!(digest, sha1_hex(b"hello world"));
        assert_eq!(len, 11);
    }

    #[tokio::test]
    async fn test_parts_hash_their_exact_range() {
        let data: Vec<u8> = (0..25u8).collect();
        let file = temp_file(&data);
        let SourceAdapter::Partitioned(mut source) =
            adapt(file.path().to_path_buf(), 10, 20).await.unwrap()
        else {
            panic!("expected a partitioned source");
        };

        let mut parts = Vec::new();
        while let Some(part) = source.next_part().await.unwrap() {
            parts.push(part);
        }

        assert_eq!(parts.len(), 3);
        for (i, part) in parts.iter().enumerate() {
            let start = i * 10;
            let end = (start + 10).min(data.len());
            assert_eq!(part.number, i as u32 + 1);
            assert_eq!(part.len, (end - start) as u64);
            assert_eq!(part.sha1, sha1_hex(&data[start..end]));

            let (reread, _) = hash_stream(part.open().await.unwrap()).await.unwrap();
            assert_eq!(reread, part.sha1);
        }
    }
}
