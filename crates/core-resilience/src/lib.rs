//! b2lift Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks the upload engine uses to survive
//! an object-storage API whose upload credentials are single-use, expire
//! without warning and must be pooled under contention:
//!
//! - **Retry Policy**: bounded attempts with fixed, linear or exponential
//!   backoff (optionally jittered) and a hard per-delay cap
//! - **Token Pool**: keyed queues of reusable credentials and the *borrow*
//!   protocol (acquire, use, classify failure, retry/discard/reauthorize,
//!   requeue)
//! - **Single Flight**: a TTL-bounded memoized async value shared by all
//!   concurrent callers, used to deduplicate reauthorization
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - HTTP, status codes or any particular storage API
//! - Where credentials come from
//! - Application error types
//!
//! Those concerns are plugged in through [`CredentialBroker`].
//!
//! # Architecture
//!
//! ```text
//!   borrow(key, work)
//!         │
//!         ▼
//! ┌─────────────────────────────┐   empty queue   ┌──────────────────┐
//! │  TokenPool queue for `key`  │ ──────────────▶ │ broker.issue(key)│
//! └─────────────┬───────────────┘                 └──────────────────┘
//!               │ credential
//!               ▼
//!         work(credential)
//!               │ error
//!               ▼
//!      broker.classify(..) ──▶ Keep / Discard / Reauthorize / Fatal
//!               │
//!               ├── retry-after? sleep, no budget consumed
//!               ├── Reauthorize: SingleFlight-deduplicated refresh
//!               └── RetryPolicy::delay_for(attempt), up to max_attempts
//! ```

pub mod backoff;
pub mod single_flight;
pub mod token_pool;

// Re-export main types for convenience
pub use backoff::{BackoffStrategy, RetryPolicy};
pub use single_flight::SingleFlight;
pub use token_pool::{CredentialBroker, PoolStats, TokenPool, Verdict};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use b2lift_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::{BackoffStrategy, RetryPolicy};
    pub use super::single_flight::SingleFlight;
    pub use super::token_pool::{CredentialBroker, PoolStats, TokenPool, Verdict};
}
