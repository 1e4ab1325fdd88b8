//! Credential broker for B2 upload URLs
//!
//! Plugs the B2 failure semantics into the generic [`TokenPool`]: which
//! statuses and transport faults poison a credential, which merely call for
//! another try, and when the account itself has to be reauthorized.

use crate::api::{ApiError, B2Api, TransportFault, UploadCredential};
use crate::error::UploadError;
use b2lift_core_resilience::{CredentialBroker, SingleFlight, TokenPool, Verdict};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long a successful reauthorization is reused
pub const DEFAULT_REAUTH_TTL: Duration = Duration::from_secs(600);

/// Pool of upload credentials keyed by bucket or large file
pub type UploadTokenPool = TokenPool<B2Broker>;

/// Identifies one credential queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// Standard uploads into a bucket, shared by every upload into it
    Bucket(String),
    /// Part uploads into one large file, private to that upload
    LargeFile(String),
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKey::Bucket(id) => write!(f, "bucket:{}", id),
            PoolKey::LargeFile(id) => write!(f, "large-file:{}", id),
        }
    }
}

/// Issues B2 upload credentials and classifies upload failures
pub struct B2Broker {
    api: Arc<dyn B2Api>,
    auth: SingleFlight<(), ApiError>,
}

impl B2Broker {
    pub fn new(api: Arc<dyn B2Api>, reauth_ttl: Duration) -> Self {
        Self {
            api,
            auth: SingleFlight::new(reauth_ttl),
        }
    }

    pub fn api(&self) -> &Arc<dyn B2Api> {
        &self.api
    }

    /// Number of account authorizations actually performed
    pub fn authorizations(&self) -> u64 {
        self.auth.runs()
    }
}

#[async_trait::async_trait]
impl CredentialBroker for B2Broker {
    type Key = PoolKey;
    type Credential = UploadCredential;
    type Error = UploadError;

    async fn issue(&self, key: &PoolKey) -> Result<UploadCredential, UploadError> {
        let credential = match key {
            PoolKey::Bucket(bucket_id) => self.api.get_upload_url(bucket_id).await?,
            PoolKey::LargeFile(file_id) => self.api.get_upload_part_url(file_id).await?,
        };
        Ok(credential)
    }

    async fn reauthorize(&self) -> Result<(), UploadError> {
        let api = Arc::clone(&self.api);
        self.auth
            .run(move || async move {
                info!("reauthorizing account");
                api.authorize().await
            })
            .await
            .map_err(UploadError::from)
    }

    fn classify(&self, credential: Option<&UploadCredential>, error: &UploadError) -> Verdict {
        let UploadError::Api(api_error) = error else {
            return Verdict::Fatal;
        };

        match credential {
            Some(credential) => classify_upload(credential, api_error),
            None => classify_issue(api_error),
        }
    }

    fn retry_after(&self, error: &UploadError) -> Option<Duration> {
        match error {
            UploadError::Api(api_error) => api_error.retry_after(),
            _ => None,
        }
    }

    fn exhausted(&self, key: &PoolKey, attempts: u32, last: UploadError) -> UploadError {
        UploadError::RetriesExhausted {
            pool: key.to_string(),
            attempts,
            source: Box::new(last),
        }
    }
}

/// Failure of a request made with `credential`
fn classify_upload(credential: &UploadCredential, error: &ApiError) -> Verdict {
    if error.url() != Some(credential.upload_url.as_str()) {
        return Verdict::Fatal;
    }

    if error.is_token_contention() {
        return Verdict::Discard;
    }

    match error {
        ApiError::Status { status: 401, .. } => Verdict::Reauthorize,
        ApiError::Status { status: 503, .. } => Verdict::Discard,
        ApiError::Status {
            status: 500 | 429, ..
        } => Verdict::Keep,
        ApiError::Transport { fault, .. } => match fault {
            TransportFault::ConnectionRefused | TransportFault::ConnectTimeout => Verdict::Discard,
            TransportFault::ConnectionReset | TransportFault::DnsLookup => Verdict::Keep,
            TransportFault::Timeout | TransportFault::Other(_) => Verdict::Fatal,
        },
        _ => Verdict::Fatal,
    }
}

/// Failure while obtaining a credential; there is nothing to keep or drop
fn classify_issue(error: &ApiError) -> Verdict {
    match error {
        ApiError::Status { status: 401, .. } => Verdict::Reauthorize,
        ApiError::Status {
            status: 429 | 500 | 503,
            ..
        } => Verdict::Discard,
        ApiError::Transport { fault, .. } => match fault {
            TransportFault::Timeout | TransportFault::Other(_) => Verdict::Fatal,
            _ => Verdict::Discard,
        },
        _ => Verdict::Fatal,
    }
}
