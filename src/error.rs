/*!
 * Error types for b2lift
 */

use crate::api::{ApiError, TransportFault};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UploadError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Malformed upload request, raised before any I/O
    #[error("Invalid upload request: {0}")]
    Validation(String),

    /// Configuration file or settings are unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// File source does not name a regular file
    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Reading the upload source failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A B2 API call failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A large-file part could not be uploaded
    #[error("Part {part_number} of large file {file_id} failed: {source}")]
    Part {
        file_id: String,
        part_number: u32,
        #[source]
        source: Box<UploadError>,
    },

    /// The credential pool gave up after its retry budget
    #[error("Gave up on pool {pool} after {attempts} attempts: {source}")]
    RetriesExhausted {
        pool: String,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    /// Completed parts do not form a contiguous 1..=N sequence
    #[error("Large file {file_id} is missing part {part_number}")]
    MissingPart { file_id: String, part_number: u32 },

    /// The upload failed and cancelling its large file failed too
    #[error("{source} (cancelling large file {file_id} also failed: {cancel_error})")]
    Cancelled {
        file_id: String,
        #[source]
        source: Box<UploadError>,
        cancel_error: ApiError,
    },

    /// A part upload task died without reporting a result
    #[error("Upload worker failed: {0}")]
    Worker(String),
}

impl UploadError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Validation => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            UploadError::Validation(_) | UploadError::Config(_) | UploadError::NotAFile(_) => {
                ErrorCategory::Validation
            }
            UploadError::Api(api) => api_category(api),
            UploadError::Part { source, .. } => source.category(),
            UploadError::RetriesExhausted { .. } => ErrorCategory::Transient,
            UploadError::Cancelled { .. } => ErrorCategory::Cleanup,
            UploadError::Io(_) | UploadError::MissingPart { .. } | UploadError::Worker(_) => {
                ErrorCategory::Fatal
            }
        }
    }

    /// The API error at the root of this error, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            UploadError::Api(api) => Some(api),
            UploadError::Part { source, .. }
            | UploadError::RetriesExhausted { source, .. }
            | UploadError::Cancelled { source, .. } => source.api_error(),
            _ => None,
        }
    }

    /// The error that started the failure, looking through wrappers
    pub fn root(&self) -> &UploadError {
        match self {
            UploadError::Part { source, .. }
            | UploadError::RetriesExhausted { source, .. }
            | UploadError::Cancelled { source, .. } => source.root(),
            other => other,
        }
    }
}

fn api_category(api: &ApiError) -> ErrorCategory {
    match api {
        ApiError::Status { status: 401, .. } => ErrorCategory::Authentication,
        ApiError::Status {
            status: 429 | 500 | 503,
            ..
        } => ErrorCategory::Transient,
        ApiError::Transport { fault, .. } => match fault {
            TransportFault::Other(_) => ErrorCategory::Fatal,
            _ => ErrorCategory::Transient,
        },
        ApiError::Client(_) => ErrorCategory::Validation,
        _ => ErrorCategory::Fatal,
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed request or configuration
    Validation,
    /// Expired or contended credential, rate limiting, flaky connection
    Transient,
    /// Account authorization rejected
    Authentication,
    /// Anything not recoverable by retrying
    Fatal,
    /// Failure while cancelling a partially uploaded large file
    Cleanup,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::Cleanup => write!(f, "cleanup"),
        }
    }
}
