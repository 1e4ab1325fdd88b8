//! Boundary to the B2 service API
//!
//! The upload engine never speaks HTTP itself. Everything it needs from the
//! service is expressed by the [`B2Api`] trait: issuing upload credentials,
//! starting/finishing/cancelling large files, and the raw upload requests.
//! [`HttpB2Api`] implements it against the native B2 v2 HTTP API; tests plug
//! in scripted implementations.

mod error;
mod http;
mod types;

pub use error::{ApiError, ApiResult, TransportFault};
pub use http::{HttpB2Api, HttpB2ApiBuilder, DEFAULT_API_BASE};
pub use types::{
    LargeFile, ReadStream, UploadCredential, UploadFileRequest, UploadPartRequest,
};

use serde_json::Value;

/// Operations the upload engine needs from the remote service
#[async_trait::async_trait]
pub trait B2Api: Send + Sync {
    /// Refresh account-level authorization
    async fn authorize(&self) -> ApiResult<()>;

    /// Fresh credential for standard uploads into `bucket_id`
    async fn get_upload_url(&self, bucket_id: &str) -> ApiResult<UploadCredential>;

    /// Fresh credential for part uploads into large file `file_id`
    async fn get_upload_part_url(&self, file_id: &str) -> ApiResult<UploadCredential>;

    /// Start a large file and return its id
    async fn start_large_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> ApiResult<LargeFile>;

    /// Assemble a large file from its parts, `part_sha1s[i]` being part `i + 1`
    async fn finish_large_file(&self, file_id: &str, part_sha1s: &[String]) -> ApiResult<Value>;

    /// Abandon a large file and its uploaded parts
    async fn cancel_large_file(&self, file_id: &str) -> ApiResult<Value>;

    /// Single-request upload using a bucket-scoped credential
    async fn upload_file(
        &self,
        credential: &UploadCredential,
        request: UploadFileRequest,
    ) -> ApiResult<Value>;

    /// Upload one part using a large-file-scoped credential
    async fn upload_part(
        &self,
        credential: &UploadCredential,
        request: UploadPartRequest,
    ) -> ApiResult<Value>;
}
