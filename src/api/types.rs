//! Type definitions for B2 API calls

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

/// Async byte stream used as an upload body
pub type ReadStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// An upload URL paired with the token that authorizes one request to it
///
/// Scoped either to a bucket (standard uploads) or to one large file
/// (part uploads).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCredential {
    /// Where the upload is POSTed
    pub upload_url: String,

    /// Value of the `Authorization` header
    pub authorization_token: String,
}

/// A started large file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeFile {
    /// Remote id used by part uploads, finish and cancel
    pub file_id: String,
}

/// Body and headers of a standard (single request) upload
pub struct UploadFileRequest {
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    /// Hex SHA-1 of the whole body
    pub content_sha1: String,
    pub body: ReadStream,
}

impl fmt::Debug for UploadFileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFileRequest")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("content_sha1", &self.content_sha1)
            .finish_non_exhaustive()
    }
}

/// Body and headers of one large-file part upload
pub struct UploadPartRequest {
    /// 1-based part number
    pub part_number: u32,
    pub content_length: u64,
    /// Hex SHA-1 of this part
    pub content_sha1: String,
    pub body: ReadStream,
}

impl fmt::Debug for UploadPartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPartRequest")
            .field("part_number", &self.part_number)
            .field("content_length", &self.content_length)
            .field("content_sha1", &self.content_sha1)
            .finish_non_exhaustive()
    }
}

/// Account session returned by `b2_authorize_account`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountSession {
    pub api_url: String,
    pub authorization_token: String,
}

/// JSON error body returned by B2 on failure
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
