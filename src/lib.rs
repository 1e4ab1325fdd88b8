/*!
 * b2lift - Resilient uploads to Backblaze B2
 *
 * Uploads in-memory buffers, local files and unbounded byte streams:
 * - Single-request uploads below the large-file threshold
 * - Multi-part large files with bounded part concurrency above it
 * - Pooled single-use upload credentials with classified retries
 * - Deduplicated account reauthorization
 * - Streams split into fixed-size parts with bounded read-ahead
 */

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod upload;

// Re-export commonly used types
pub use api::{ApiError, B2Api, HttpB2Api};
pub use config::UploaderConfig;
pub use error::{ErrorCategory, Result, UploadError};
pub use upload::{UploadRequest, UploadSource, Uploader, UploaderBuilder};
pub use b2lift_core_resilience::{BackoffStrategy, PoolStats, RetryPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
