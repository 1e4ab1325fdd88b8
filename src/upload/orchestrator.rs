/*!
 * Upload orchestration
 *
 * Picks the direct or large-file protocol from the shape of the source
 * adapter and drives it to completion:
 *
 * - Direct: hash and size the source concurrently, then send it in one
 *   request with a bucket credential.
 * - Partitioned: start a large file, upload parts through a bounded set of
 *   concurrent tasks, then finish with the part hashes ordered by part
 *   number. Any failure after the start cancels the large file.
 */

use crate::api::{B2Api, UploadFileRequest, UploadPartRequest};
use crate::config::UploaderConfig;
use crate::error::{Result, UploadError};
use crate::upload::broker::{B2Broker, PoolKey, UploadTokenPool, DEFAULT_REAUTH_TTL};
use crate::upload::hasher::hash_stream;
use crate::upload::request::{UploadDefaults, UploadRequest, ValidatedRequest};
use crate::upload::source::{
    DirectSource, Part, PartitionedSource, SourceAdapter, StreamAdapterOptions,
};
use b2lift_core_resilience::{PoolStats, RetryPolicy, TokenPool};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Uploads files to B2, sharing credentials across every upload it runs
///
/// Holds no hidden global state: the credential pool, the reauthorization
/// cache and the defaults all live here.
///
/// # Example
///
/// ```no_run
/// use b2lift::api::HttpB2Api;
/// use b2lift::upload::{UploadRequest, Uploader};
/// use std::path::PathBuf;
/// use std::sync::Arc;
///
/// # async fn example() -> b2lift::Result<()> {
/// let api = Arc::new(HttpB2Api::builder("key-id", "application-key").build()?);
/// let uploader = Uploader::builder(api)
///     .part_size(100_000_000)
///     .concurrency(4)
///     .build();
///
/// let request = UploadRequest::new("bucket-id", "backups/db.tar", PathBuf::from("db.tar"));
/// let file = uploader.upload(request).await?;
/// println!("{}", file["fileId"]);
/// # Ok(())
/// # }
/// ```
pub struct Uploader {
    api: Arc<dyn B2Api>,
    pool: Arc<UploadTokenPool>,
    defaults: UploadDefaults,
    stream_options: StreamAdapterOptions,
}

impl Uploader {
    pub fn builder(api: Arc<dyn B2Api>) -> UploaderBuilder {
        UploaderBuilder::new(api)
    }

    /// Defaults applied to requests that leave a setting unset
    pub fn defaults(&self) -> &UploadDefaults {
        &self.defaults
    }

    /// Activity counters of the shared credential pool
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Account authorizations performed after a rejected credential
    pub fn reauthorizations(&self) -> u64 {
        self.pool.broker().authorizations()
    }

    /// Upload one file, returning the JSON body of the final upload or finish call
    pub async fn upload(&self, request: UploadRequest) -> Result<Value> {
        let request = request.validate(&self.defaults)?;
        let span = info_span!(
            "upload",
            upload_id = %Uuid::new_v4(),
            bucket_id = %request.bucket_id,
            file_name = %request.file_name
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: ValidatedRequest) -> Result<Value> {
        let ValidatedRequest {
            bucket_id,
            file_name,
            content_type,
            part_size,
            large_file_threshold,
            concurrency,
            source,
        } = request;

        info!(
            source = source.kind(),
            part_size,
            large_file_threshold,
            concurrency,
            "starting upload"
        );

        let target = Target {
            bucket_id,
            file_name,
            content_type,
        };

        match SourceAdapter::open(source, part_size, large_file_threshold, &self.stream_options)
            .await?
        {
            SourceAdapter::Direct(mut source) => {
                let result = self.upload_direct(&target, source.as_ref()).await;
                source.destroy().await;
                result
            }
            SourceAdapter::Partitioned(source) => {
                self.upload_large_file(&target, concurrency, source).await
            }
        }
    }

    async fn upload_direct(&self, target: &Target, source: &dyn DirectSource) -> Result<Value> {
        let hash = async {
            let stream = source.open().await?;
            Ok::<_, UploadError>(hash_stream(stream).await?)
        };
        let ((sha1, hashed), size) = tokio::try_join!(hash, source.size())?;

        if hashed != size {
            return Err(UploadError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("source changed while hashing: {} bytes read, {} reported", hashed, size),
            )));
        }
        debug!(size, %sha1, "hashed source");

        let key = PoolKey::Bucket(target.bucket_id.clone());
        let response = self
            .pool
            .borrow(&key, |credential| {
                let api = Arc::clone(&self.api);
                let file_name = target.file_name.clone();
                let content_type = target.content_type.clone();
                let sha1 = sha1.clone();
                async move {
                    let body = source.open().await?;
                    let request = UploadFileRequest {
                        file_name,
                        content_type,
                        content_length: size,
                        content_sha1: sha1,
                        body,
                    };
                    Ok::<_, UploadError>(api.upload_file(&credential, request).await?)
                }
            })
            .await?;

        info!(size, "upload finished");
        Ok(response)
    }

    async fn upload_large_file(
        &self,
        target: &Target,
        concurrency: usize,
        mut source: Box<dyn PartitionedSource>,
    ) -> Result<Value> {
        let file_id = match self
            .api
            .start_large_file(&target.bucket_id, &target.file_name, &target.content_type)
            .await
        {
            Ok(large_file) => large_file.file_id,
            Err(e) => {
                source.destroy().await;
                return Err(e.into());
            }
        };
        info!(%file_id, "started large file");

        let key = PoolKey::LargeFile(file_id.clone());
        let parts = self
            .upload_parts(&file_id, &key, concurrency, source.as_mut())
            .await;
        source.destroy().await;

        let result = match parts {
            Ok(sha1s) => {
                let count = sha1s.len();
                self.api
                    .finish_large_file(&file_id, &sha1s)
                    .await
                    .map(|response| (response, count))
                    .map_err(UploadError::from)
            }
            Err(e) => Err(e),
        };
        let evicted = self.pool.evict(&key).await;
        debug!(%file_id, evicted, "released part credentials");

        match result {
            Ok((response, parts)) => {
                info!(%file_id, parts, "large file finished");
                Ok(response)
            }
            Err(error) => Err(self.cancel(file_id, error).await),
        }
    }

    /// Cancel a failed large file, keeping `error` as the reported cause
    async fn cancel(&self, file_id: String, error: UploadError) -> UploadError {
        warn!(%file_id, %error, "large file upload failed, cancelling");

        match self.api.cancel_large_file(&file_id).await {
            Ok(_) => error,
            Err(cancel_error) => {
                warn!(%file_id, %cancel_error, "cancelling large file failed");
                UploadError::Cancelled {
                    file_id,
                    source: Box::new(error),
                    cancel_error,
                }
            }
        }
    }

    /// Upload every part the source produces, at most `concurrency` at once
    ///
    /// Returns the part hashes ordered by part number. While parts upload,
    /// the next one is produced concurrently; the first failure stops
    /// production, aborts the remaining tasks and drops their results.
    async fn upload_parts(
        &self,
        file_id: &str,
        key: &PoolKey,
        concurrency: usize,
        source: &mut dyn PartitionedSource,
    ) -> Result<Vec<String>> {
        let mut in_flight = JoinSet::new();
        let mut completed = BTreeMap::new();
        let mut exhausted = false;

        loop {
            let wants_part = !exhausted && in_flight.len() < concurrency;
            // A part failing while the source is still producing the next
            // one must not wait for that production to finish
            let event = if wants_part && !in_flight.is_empty() {
                tokio::select! {
                    biased;
                    joined = in_flight.join_next() => Dispatch::Joined(joined),
                    next = source.next_part() => Dispatch::Produced(next),
                }
            } else if wants_part {
                Dispatch::Produced(source.next_part().await)
            } else {
                Dispatch::Joined(in_flight.join_next().await)
            };

            match event {
                Dispatch::Produced(next) => match next? {
                    Some(part) => {
                        let span = info_span!("part", part_number = part.number, len = part.len);
                        debug!(part_number = part.number, len = part.len, "dispatching part");
                        in_flight.spawn(
                            upload_part(
                                Arc::clone(&self.pool),
                                key.clone(),
                                file_id.to_string(),
                                part,
                            )
                            .instrument(span),
                        );
                    }
                    None => exhausted = true,
                },
                Dispatch::Joined(Some(Ok(Ok((number, sha1))))) => {
                    completed.insert(number, sha1);
                }
                Dispatch::Joined(Some(Ok(Err(e)))) => return Err(e),
                Dispatch::Joined(Some(Err(e))) => return Err(UploadError::Worker(e.to_string())),
                Dispatch::Joined(None) => break,
            }
        }

        ordered_sha1s(file_id, completed)
    }
}

/// What the part dispatcher woke up for
enum Dispatch {
    Produced(Result<Option<Part>>),
    Joined(Option<std::result::Result<Result<(u32, String)>, JoinError>>),
}

struct Target {
    bucket_id: String,
    file_name: String,
    content_type: String,
}

async fn upload_part(
    pool: Arc<UploadTokenPool>,
    key: PoolKey,
    file_id: String,
    part: Part,
) -> Result<(u32, String)> {
    let result = pool
        .borrow(&key, |credential| {
            let api = Arc::clone(pool.broker().api());
            let part = part.clone();
            async move {
                let request = UploadPartRequest {
                    part_number: part.number,
                    content_length: part.len,
                    content_sha1: part.sha1.clone(),
                    body: part.open().await?,
                };
                api.upload_part(&credential, request).await?;
                Ok::<_, UploadError>(())
            }
        })
        .await;

    match result {
        Ok(()) => {
            debug!("part uploaded");
            Ok((part.number, part.sha1))
        }
        Err(source) => Err(UploadError::Part {
            file_id,
            part_number: part.number,
            source: Box::new(source),
        }),
    }
}

/// Part hashes as a gap-free array where index `i` holds part `i + 1`
fn ordered_sha1s(file_id: &str, completed: BTreeMap<u32, String>) -> Result<Vec<String>> {
    let mut sha1s = Vec::with_capacity(completed.len());
    for (expected, (number, sha1)) in (1u32..).zip(completed) {
        if number != expected {
            return Err(UploadError::MissingPart {
                file_id: file_id.to_string(),
                part_number: expected,
            });
        }
        sha1s.push(sha1);
    }

    if sha1s.is_empty() {
        return Err(UploadError::MissingPart {
            file_id: file_id.to_string(),
            part_number: 1,
        });
    }
    Ok(sha1s)
}

/// Builder for [`Uploader`]
pub struct UploaderBuilder {
    api: Arc<dyn B2Api>,
    defaults: UploadDefaults,
    retry_policy: RetryPolicy,
    reauth_ttl: Duration,
    stream_options: StreamAdapterOptions,
}

impl UploaderBuilder {
    fn new(api: Arc<dyn B2Api>) -> Self {
        Self {
            api,
            defaults: UploadDefaults::default(),
            retry_policy: RetryPolicy::default(),
            reauth_ttl: DEFAULT_REAUTH_TTL,
            stream_options: StreamAdapterOptions::default(),
        }
    }

    /// Apply every setting from a configuration file
    pub fn config(mut self, config: &UploaderConfig) -> Self {
        self.defaults = config.upload_defaults();
        self.retry_policy = config.retry.to_policy();
        self.reauth_ttl = Duration::from_secs(config.reauth_ttl_secs);
        self.stream_options = StreamAdapterOptions {
            lookahead_floor: config.stream_lookahead_floor,
        };
        self
    }

    /// Default part size for requests that do not set one
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.defaults.part_size = Some(part_size);
        self
    }

    pub fn large_file_threshold(mut self, threshold: u64) -> Self {
        self.defaults.large_file_threshold = Some(threshold);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.defaults.concurrency = concurrency;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.defaults.content_type = content_type.into();
        self
    }

    /// Retry budget and backoff applied to every credential borrow
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// How long a successful reauthorization is reused
    pub fn reauth_ttl(mut self, ttl: Duration) -> Self {
        self.reauth_ttl = ttl;
        self
    }

    pub fn stream_options(mut self, options: StreamAdapterOptions) -> Self {
        self.stream_options = options;
        self
    }

    pub fn build(self) -> Uploader {
        let broker = Arc::new(B2Broker::new(Arc::clone(&self.api), self.reauth_ttl));
        Uploader {
            api: self.api,
            pool: Arc::new(TokenPool::new(broker, self.retry_policy)),
            defaults: self.defaults,
            stream_options: self.stream_options,
        }
    }
}
