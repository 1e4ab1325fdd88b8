//! The upload engine
//!
//! - [`request`]: caller-facing request and its validation
//! - [`source`]: buffer, file and stream adapters
//! - [`hasher`]: SHA-1 of bodies and parts
//! - [`broker`]: B2 failure classification for the credential pool
//! - [`orchestrator`]: the [`Uploader`] driving direct and large-file uploads

pub mod broker;
pub mod hasher;
pub mod orchestrator;
pub mod request;
pub mod source;

pub use broker::{B2Broker, PoolKey, UploadTokenPool, DEFAULT_REAUTH_TTL};
pub use hasher::{hash_stream, sha1_hex, PartHasher};
pub use orchestrator::{Uploader, UploaderBuilder};
pub use request::{
    UploadDefaults, UploadRequest, UploadSource, ValidatedRequest, DEFAULT_CONCURRENCY,
    DEFAULT_CONTENT_TYPE, MAX_PART_SIZE, MIN_PART_SIZE,
};
pub use source::{DirectSource, Part, PartitionedSource, SourceAdapter, StreamAdapterOptions};
