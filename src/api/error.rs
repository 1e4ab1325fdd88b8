//! Error types for B2 API calls

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for B2 API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Low-level transport failure, before any HTTP status was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The remote end refused the connection
    ConnectionRefused,
    /// Connecting took longer than the connect timeout
    ConnectTimeout,
    /// An established connection was reset
    ConnectionReset,
    /// Name resolution failed and may succeed on retry
    DnsLookup,
    /// The request exceeded its overall timeout
    Timeout,
    /// Anything else
    Other(String),
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::ConnectionRefused => write!(f, "connection refused"),
            TransportFault::ConnectTimeout => write!(f, "connect timed out"),
            TransportFault::ConnectionReset => write!(f, "connection reset"),
            TransportFault::DnsLookup => write!(f, "DNS lookup failed"),
            TransportFault::Timeout => write!(f, "request timed out"),
            TransportFault::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Errors returned by a [`B2Api`](super::B2Api) implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The service answered with a non-success status
    #[error("B2 returned HTTP {status} for {url}: {message}")]
    Status {
        url: String,
        status: u16,
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The request never produced a response
    #[error("transport failure for {url}: {fault}")]
    Transport { url: String, fault: TransportFault },

    /// The response could not be understood
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The client is not usable (missing credentials, bad base URL)
    #[error("B2 client misconfigured: {0}")]
    Client(String),
}

impl ApiError {
    /// Build a status error from parts
    pub fn status(
        url: impl Into<String>,
        status: u16,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        ApiError::Status {
            url: url.into(),
            status,
            code: code.map(str::to_string),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build a transport error
    pub fn transport(url: impl Into<String>, fault: TransportFault) -> Self {
        ApiError::Transport {
            url: url.into(),
            fault,
        }
    }

    /// Attach a server-requested retry delay to a status error
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        if let ApiError::Status { retry_after, .. } = &mut self {
            *retry_after = Some(delay);
        }
        self
    }

    /// URL of the request that failed, when known
    pub fn url(&self) -> Option<&str> {
        match self {
            ApiError::Status { url, .. }
            | ApiError::Transport { url, .. }
            | ApiError::Decode { url, .. } => Some(url),
            ApiError::Client(_) => None,
        }
    }

    /// HTTP status, when the service answered
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transport fault, when there was no answer
    pub fn fault(&self) -> Option<&TransportFault> {
        match self {
            ApiError::Transport { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// Server-requested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the error says the same upload token is already in use
    pub fn is_token_contention(&self) -> bool {
        match self {
            ApiError::Status {
                status: 400,
                message,
                ..
            } => message.to_lowercase().contains("more than one upload using auth token"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let err = ApiError::status("https://pod/upload", 503, Some("service_unavailable"), "busy")
            .with_retry_after(Duration::from_secs(3));

        assert_eq!(err.url(), Some("https://pod/upload"));
        assert_eq!(err.http_status(), Some(503));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.fault().is_none());
    }

    #[test]
    fn test_retry_after_ignored_for_transport() {
        let err = ApiError::transport("https://pod/upload", TransportFault::ConnectionReset)
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.fault(), Some(&TransportFault::ConnectionReset));
    }

    #[test]
    fn test_token_contention_detection() {
        let err = ApiError::status(
            "https://pod/upload",
            400,
            Some("bad_request"),
            "More than one upload using auth token 4_002d2e",
        );
        assert!(err.is_token_contention());

        let other = ApiError::status("https://pod/upload", 400, Some("bad_request"), "bad sha1");
        assert!(!other.is_token_contention());
    }

    #[test]
    fn test_error_display_formats() {
        let err = ApiError::status("https://api/b2_get_upload_url", 401, None, "expired");
        assert_eq!(
            err.to_string(),
            "B2 returned HTTP 401 for https://api/b2_get_upload_url: expired"
        );

        let err = ApiError::transport("https://pod", TransportFault::ConnectionRefused);
        assert_eq!(err.to_string(), "transport failure for https://pod: connection refused");
    }
}
