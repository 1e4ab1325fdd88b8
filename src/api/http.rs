//! [`B2Api`] over the native B2 v2 HTTP API

use super::error::{ApiError, ApiResult, TransportFault};
use super::types::{
    AccountSession, ErrorBody, LargeFile, UploadCredential, UploadFileRequest, UploadPartRequest,
};
use super::B2Api;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Body, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::error::Error as _;
use std::io;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Public B2 API endpoint used for account authorization
pub const DEFAULT_API_BASE: &str = "https://api.backblazeb2.com";

/// Characters B2 accepts unescaped in `X-Bz-File-Name`
const FILE_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// HTTP client for the B2 service
///
/// # Example
///
/// ```no_run
/// use b2lift::api::{B2Api, HttpB2Api};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let api = HttpB2Api::builder("key-id", "application-key").build()?;
/// api.authorize().await?;
/// let credential = api.get_upload_url("bucket-id").await?;
/// println!("uploading to {}", credential.upload_url);
/// # Ok(())
/// # }
/// ```
pub struct HttpB2Api {
    http: reqwest::Client,
    api_base: String,
    key_id: String,
    application_key: String,
    session: RwLock<Option<AccountSession>>,
}

impl HttpB2Api {
    /// Start building a client for the given application key
    pub fn builder(
        key_id: impl Into<String>,
        application_key: impl Into<String>,
    ) -> HttpB2ApiBuilder {
        HttpB2ApiBuilder::new(key_id.into(), application_key.into())
    }

    /// Current account session, authorizing first if there is none
    async fn session(&self) -> ApiResult<AccountSession> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }

        self.authorize().await?;

        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ApiError::Client("authorization produced no session".to_string()))
    }

    /// POST a JSON body to `{apiUrl}/b2api/v2/{operation}`
    async fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> ApiResult<T> {
        let session = self.session().await?;
        let url = format!("{}/b2api/v2/{}", session.api_url.trim_end_matches('/'), operation);
        debug!(%url, "calling B2 API");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, &session.authorization_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        read_json(&url, response).await
    }
}

#[async_trait::async_trait]
impl B2Api for HttpB2Api {
    async fn authorize(&self) -> ApiResult<()> {
        let url = format!("{}/b2api/v2/b2_authorize_account", self.api_base);
        debug!(%url, "authorizing account");

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.key_id, Some(&self.application_key))
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        let session: AccountSession = read_json(&url, response).await?;
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn get_upload_url(&self, bucket_id: &str) -> ApiResult<UploadCredential> {
        self.call("b2_get_upload_url", json!({ "bucketId": bucket_id }))
            .await
    }

    async fn get_upload_part_url(&self, file_id: &str) -> ApiResult<UploadCredential> {
        self.call("b2_get_upload_part_url", json!({ "fileId": file_id }))
            .await
    }

    async fn start_large_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> ApiResult<LargeFile> {
        self.call(
            "b2_start_large_file",
            json!({
                "bucketId": bucket_id,
                "fileName": file_name,
                "contentType": content_type,
            }),
        )
        .await
    }

    async fn finish_large_file(&self, file_id: &str, part_sha1s: &[String]) -> ApiResult<Value> {
        self.call(
            "b2_finish_large_file",
            json!({ "fileId": file_id, "partSha1Array": part_sha1s }),
        )
        .await
    }

    async fn cancel_large_file(&self, file_id: &str) -> ApiResult<Value> {
        self.call("b2_cancel_large_file", json!({ "fileId": file_id }))
            .await
    }

    async fn upload_file(
        &self,
        credential: &UploadCredential,
        request: UploadFileRequest,
    ) -> ApiResult<Value> {
        let url = credential.upload_url.as_str();
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, &credential.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(&request.file_name))
            .header(CONTENT_TYPE, &request.content_type)
            .header(CONTENT_LENGTH, request.content_length)
            .header("X-Bz-Content-Sha1", &request.content_sha1)
            .body(Body::wrap_stream(request.body))
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        read_json(url, response).await
    }

    async fn upload_part(
        &self,
        credential: &UploadCredential,
        request: UploadPartRequest,
    ) -> ApiResult<Value> {
        let url = credential.upload_url.as_str();
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, &credential.authorization_token)
            .header("X-Bz-Part-Number", request.part_number)
            .header(CONTENT_LENGTH, request.content_length)
            .header("X-Bz-Content-Sha1", &request.content_sha1)
            .body(Body::wrap_stream(request.body))
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        read_json(url, response).await
    }
}

/// Builder for [`HttpB2Api`]
pub struct HttpB2ApiBuilder {
    key_id: String,
    application_key: String,
    api_base: String,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl HttpB2ApiBuilder {
    fn new(key_id: String, application_key: String) -> Self {
        Self {
            key_id,
            application_key,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Override the authorization endpoint
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Socket-level timeout covering connection and transfer of one request
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Timeout for establishing a connection
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the client
    pub fn build(self) -> ApiResult<HttpB2Api> {
        if self.key_id.is_empty() || self.application_key.is_empty() {
            return Err(ApiError::Client(
                "application key id and key must both be set".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ApiError::Client(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpB2Api {
            http,
            api_base: self.api_base.trim_end_matches('/').to_string(),
            key_id: self.key_id,
            application_key: self.application_key,
            session: RwLock::new(None),
        })
    }
}

/// Percent-encode a file name for the `X-Bz-File-Name` header
pub(crate) fn encode_file_name(name: &str) -> String {
    utf8_percent_encode(name, FILE_NAME_SET).to_string()
}

/// Parse a `Retry-After` header given in seconds
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Decode a success body, or turn a failure status into [`ApiError::Status`]
async fn read_json<T: DeserializeOwned>(url: &str, response: Response) -> ApiResult<T> {
    let status = response.status();

    if status.is_success() || status.is_redirection() {
        return response.json::<T>().await.map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        });
    }

    let retry_after = parse_retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let (code, message) = match body {
        Some(body) => (body.code, body.message),
        None => (None, None),
    };
    let message = message.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });

    Err(ApiError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        code,
        message,
        retry_after,
    })
}

/// Map a reqwest failure onto a [`TransportFault`]
fn transport_error(url: &str, err: &reqwest::Error) -> ApiError {
    ApiError::transport(url, classify_transport(err))
}

fn classify_transport(err: &reqwest::Error) -> TransportFault {
    if err.is_connect() && err.is_timeout() {
        return TransportFault::ConnectTimeout;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return TransportFault::ConnectionRefused,
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => return TransportFault::ConnectionReset,
                io::ErrorKind::TimedOut if err.is_connect() => {
                    return TransportFault::ConnectTimeout
                }
                _ => {}
            }
        }

        let text = cause.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportFault::DnsLookup;
        }
        source = cause.source();
    }

    if err.is_timeout() {
        TransportFault::Timeout
    } else {
        TransportFault::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_encode_file_name() {
        assert_eq!(encode_file_name("photos/cat.jpg"), "photos/cat.jpg");
        assert_eq!(encode_file_name("my file+1.txt"), "my%20file%2B1.txt");
        assert_eq!(encode_file_name("naïve"), "na%C3%AFve");
        assert_eq!(encode_file_name("a-b_c~d"), "a-b_c~d");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_builder_rejects_missing_credentials() {
        assert!(matches!(
            HttpB2Api::builder("", "secret").build(),
            Err(ApiError::Client(_))
        ));
    }

    #[test]
    fn test_builder_normalizes_api_base() {
        let api = HttpB2Api::builder("id", "secret")
            .api_base("http://localhost:8080/")
            .request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(api.api_base, "http://localhost:8080");
    }
}
