/*!
 * Content hashing for upload bodies and parts
 *
 * B2 wants the hex SHA-1 of every body it receives, known before the
 * request is sent.
 */

use crate::api::ReadStream;
use futures::StreamExt;
use sha1::{Digest, Sha1};
use std::io;

/// Streaming hasher that calculates the digest incrementally
pub struct PartHasher {
    hasher: Sha1,
    len: u64,
}

impl PartHasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self {
            hasher: Sha1::new(),
            len: 0,
        }
    }

    /// Update the hash with new data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes seen so far
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no bytes have been seen
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finalize and return the hex digest
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for PartHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex SHA-1 of a complete buffer
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Drain a stream, returning its hex SHA-1 and length
pub async fn hash_stream(mut stream: ReadStream) -> io::Result<(String, u64)> {
    let mut hasher = PartHasher::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    let len = hasher.len();
    Ok((hasher.finalize_hex(), len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const HELLO_WORLD_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    #[test]
    fn test_streaming_hasher() {
        let mut hasher = PartHasher::new();
        assert!(hasher.is_empty());
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.len(), 11);
        assert_eq!(hasher.finalize_hex(), HELLO_WORLD_SHA1);
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex(b"hello world"), HELLO_WORLD_SHA1);
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[tokio::test]
    async fn test_hash_stream_matches_buffer_hash() {
        let chunks = vec![
            Ok(Bytes::from_static(b"hello")),
            Ok(Bytes::from_static(b" ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let stream: ReadStream = Box::pin(futures::stream::iter(chunks));

        let (digest, len) = hash_stream(stream).await.unwrap();
        assert_eq!(digest, HELLO_WORLD_SHA1);
        assert_eq!(len, 11);
    }

    #[tokio::test]
    async fn test_hash_stream_propagates_errors() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "cut off")),
        ];
        let stream: ReadStream = Box::pin(futures::stream::iter(chunks));

        let err = hash_stream(stream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
