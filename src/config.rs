/*!
 * Configuration types for b2lift
 */

use crate::api::DEFAULT_API_BASE;
use crate::error::{Result, UploadError};
use crate::upload::source::stream::DEFAULT_LOOKAHEAD_FLOOR;
use crate::upload::{
    UploadDefaults, DEFAULT_CONCURRENCY, DEFAULT_CONTENT_TYPE, MAX_PART_SIZE, MIN_PART_SIZE,
};
use b2lift_core_resilience::{BackoffStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for an [`Uploader`](crate::upload::Uploader)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Default part size in bytes for large files
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Default size at or above which the large-file protocol is used
    /// (None = twice the part size)
    #[serde(default)]
    pub large_file_threshold: Option<u64>,

    /// Default number of parts uploaded at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default content type
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Minimum read-ahead buffered between a stream source and its parts
    #[serde(default = "default_lookahead_floor")]
    pub stream_lookahead_floor: u64,

    /// Retry behaviour of every credential borrow
    #[serde(default)]
    pub retry: RetrySettings,

    /// Seconds a successful account reauthorization is reused
    #[serde(default = "default_reauth_ttl")]
    pub reauth_ttl_secs: u64,

    /// Socket-level timeout of one HTTP request, connection and transfer
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for establishing a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Account authorization endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            large_file_threshold: None,
            concurrency: default_concurrency(),
            content_type: default_content_type(),
            stream_lookahead_floor: default_lookahead_floor(),
            retry: RetrySettings::default(),
            reauth_ttl_secs: default_reauth_ttl(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            api_base: default_api_base(),
            logging: LoggingConfig::default(),
        }
    }
}

impl UploaderConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UploadError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: UploaderConfig = toml::from_str(&contents).map_err(|e| {
            UploadError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| UploadError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check the settings that would otherwise only fail at upload time
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&self.part_size) {
            return Err(UploadError::Config(format!(
                "part_size {} is outside {}..={}",
                self.part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }
        if let Some(threshold) = self.large_file_threshold {
            if threshold <= self.part_size {
                return Err(UploadError::Config(format!(
                    "large_file_threshold {} must exceed part_size {}",
                    threshold, self.part_size
                )));
            }
        }
        if self.concurrency == 0 {
            return Err(UploadError::Config("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(UploadError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(UploadError::Config(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Request defaults derived from this configuration
    pub fn upload_defaults(&self) -> UploadDefaults {
        UploadDefaults {
            part_size: Some(self.part_size),
            large_file_threshold: self.large_file_threshold,
            concurrency: self.concurrency,
            content_type: self.content_type.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Retry settings as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per borrow, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on any single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Reauthorizations allowed within one borrow
    #[serde(default = "default_max_reauthorizations")]
    pub max_reauthorizations: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffKind::default(),
            max_reauthorizations: default_max_reauthorizations(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: self.backoff.into(),
            max_reauthorizations: self.max_reauthorizations,
            ..Default::default()
        }
    }
}

/// Backoff curve between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
    #[default]
    ExponentialWithJitter,
}

impl From<BackoffKind> for BackoffStrategy {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential => BackoffStrategy::Exponential,
            BackoffKind::ExponentialWithJitter => BackoffStrategy::ExponentialWithJitter,
        }
    }
}

/// Logging destination and verbosity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path, JSON lines (None = stderr)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_part_size() -> u64 {
    100_000_000
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_lookahead_floor() -> u64 {
    DEFAULT_LOOKAHEAD_FLOOR
}

fn default_reauth_ttl() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_reauthorizations() -> u32 {
    3
}
