//! In-memory buffers, sliced without copying

use super::{bytes_stream, DirectSource, Part, PartitionedSource, SourceAdapter};
use crate::api::ReadStream;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;

pub(super) fn adapt(data: Bytes, part_size: u64, threshold: u64) -> SourceAdapter {
    if data.len() as u64 >= threshold {
        SourceAdapter::Partitioned(Box::new(BufferPartitioner {
            data,
            part_size: usize::try_from(part_size).unwrap_or(usize::MAX),
            offset: 0,
            next_number: 1,
        }))
    } else {
        SourceAdapter::Direct(Box::new(BufferSource { data }))
    }
}

struct BufferSource {
    data: Bytes,
}

#[async_trait]
impl DirectSource for BufferSource {
    async fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn open(&self) -> io::Result<ReadStream> {
        Ok(bytes_stream(vec![self.data.clone()]))
    }

    async fn destroy(&mut self) {
        self.data = Bytes::new();
    }
}

struct BufferPartitioner {
    data: Bytes,
    part_size: usize,
    offset: usize,
    next_number: u32,
}

#[async_trait]
impl PartitionedSource for BufferPartitioner {
    async fn next_part(&mut self) -> Result<Option<Part>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }

        let end = self.offset.saturating_add(self.part_size).min(self.data.len());
        let part = Part::from_bytes(self.next_number, self.data.slice(self.offset..end));
        self.offset = end;
        self.next_number += 1;
        Ok(Some(part))
    }

    async fn destroy(&mut self) {
        self.data = Bytes::new();
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(adapter: SourceAdapter) -> Vec<Part> {
        let SourceAdapter::Partitioned(mut source) = adapter else {
            panic!("expected a partitioned source");
        };
        let mut parts = Vec::new();
        while let Some(part) = source.next_part().await.unwrap() {
            parts.push(part);
        }
        parts
    }

    #[tokio::test]
    async fn test_slices_cover_buffer() {
        let data: Bytes = (0..23u8).collect::<Vec<_>>().into();
        let parts = collect(adapt(data.clone(), 10, 20)).await;

        let lens: Vec<u64> = parts.iter().map(|p| p.len).collect();
        let numbers: Vec<u32> = parts.iter().map(|p| p.number).collect();
        assert_eq!(lens, vec![10, 10, 3]);
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let parts = collect(adapt(Bytes::from(vec![7u8; 20]), 10, 20)).await;
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len == 10));
    }

    #[tokio::test]
    async fn test_maximum_part_size_is_not_truncated() {
        let data = Bytes::from(vec![3u8; 64]);
        let parts = collect(adapt(data, 5_000_000_000, 32)).await;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len, 64);
    }

    #[tokio::test]
    async fn test_direct_below_threshold() {
        let adapter = adapt(Bytes::from_static(b"small"), 10, 20);
        let SourceAdapter::Direct(source) = adapter else {
            panic!("expected a direct source");
        };
        assert_eq!(source.size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_destroy_stops_production() {
        let SourceAdapter::Partitioned(mut source) = adapt(Bytes::from(vec![1u8; 30]), 10, 20)
        else {
            panic!("expected a partitioned source");
        };
        assert!(source.next_part().await.unwrap().is_some());
        source.destroy().await;
        assert!(source.next_part().await.unwrap().is_none());
    }
}
