//! Keyed pool of reusable, single-use-per-request credentials
//!
//! Some services hand out short-lived upload credentials whose validity can
//! only be discovered by using them. [`TokenPool`] keeps one queue of
//! presumed-valid credentials per key and wraps every use in a *borrow*:
//!
//! 1. take a credential from the key's queue, or ask the broker for a new one
//! 2. run the caller's work with it
//! 3. on success, return the credential to the queue
//! 4. on failure, let the broker classify the error into a [`Verdict`] that
//!    decides whether the credential is kept, discarded, or the whole account
//!    must be reauthorized, and whether the work is retried at all
//!
//! A server-provided retry-after delay is honoured without consuming retry
//! budget. Everything else backs off according to the pool's
//! [`RetryPolicy`].
//!
//! A credential is either in exactly one queue or lent to exactly one
//! borrower; queues are only touched under the pool lock.

use crate::backoff::RetryPolicy;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What to do after a borrowed credential's work failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Transient failure, the credential is still good: requeue and retry
    Keep,
    /// The credential is expired, busy or poisoned: drop it and retry
    Discard,
    /// Account authorization expired: refresh it, drop the credential and
    /// retry without consuming retry budget
    Reauthorize,
    /// Not recoverable here: requeue the credential and fail
    Fatal,
}

impl Verdict {
    /// Whether the credential goes back into its queue
    pub fn keeps_credential(&self) -> bool {
        matches!(self, Verdict::Keep | Verdict::Fatal)
    }
}

/// Issues credentials and interprets failures for a [`TokenPool`]
#[async_trait::async_trait]
pub trait CredentialBroker: Send + Sync + 'static {
    /// Identifies one credential queue
    type Key: Eq + Hash + Clone + Debug + Send + Sync;

    /// The credential handed to borrowers
    type Credential: Clone + Send + Sync;

    /// Error produced by issuing or by the borrowed work
    type Error: Display + Send;

    /// Obtain a fresh credential for `key`
    async fn issue(&self, key: &Self::Key) -> Result<Self::Credential, Self::Error>;

    /// Refresh account-level authorization
    async fn reauthorize(&self) -> Result<(), Self::Error>;

    /// Classify a failure. `credential` is `None` when issuing itself failed.
    fn classify(&self, credential: Option<&Self::Credential>, error: &Self::Error) -> Verdict;

    /// Explicit delay requested by the server, if any
    fn retry_after(&self, error: &Self::Error) -> Option<Duration>;

    /// Final error once the retry budget is spent
    fn exhausted(&self, _key: &Self::Key, _attempts: u32, last: Self::Error) -> Self::Error {
        last
    }
}

/// Counters describing pool activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Credentials obtained from the broker
    pub issued: u64,
    /// Borrows served from a queue
    pub reused: u64,
    /// Credentials dropped after a failure
    pub discarded: u64,
    /// Reauthorizations requested
    pub reauthorizations: u64,
    /// Attempts that were retried (budgeted or not)
    pub retries: u64,
}

#[derive(Default)]
struct Counters {
    issued: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    reauthorizations: AtomicU64,
    retries: AtomicU64,
}

/// Keyed credential queues plus the borrow protocol around them
///
/// # Example
///
/// ```no_run
/// use b2lift_core_resilience::{CredentialBroker, RetryPolicy, TokenPool, Verdict};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Broker;
///
/// #[async_trait::async_trait]
/// impl CredentialBroker for Broker {
///     type Key = String;
///     type Credential = String;
///     type Error = String;
///
///     async fn issue(&self, key: &String) -> Result<String, String> {
///         Ok(format!("token-for-{key}"))
///     }
///
///     async fn reauthorize(&self) -> Result<(), String> {
///         Ok(())
///     }
///
///     fn classify(&self, _credential: Option<&String>, _error: &String) -> Verdict {
///         Verdict::Discard
///     }
///
///     fn retry_after(&self, _error: &String) -> Option<Duration> {
///         None
///     }
/// }
///
/// # async fn example() -> Result<(), String> {
/// let pool = TokenPool::new(Arc::new(Broker), RetryPolicy::default());
/// let len = pool
///     .borrow(&"bucket".to_string(), |token| async move { Ok(token.len()) })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TokenPool<B: CredentialBroker> {
    broker: Arc<B>,
    policy: RetryPolicy,
    queues: Mutex<HashMap<B::Key, VecDeque<B::Credential>>>,
    counters: Counters,
}

impl<B: CredentialBroker> TokenPool<B> {
    /// Create an empty pool
    pub fn new(broker: Arc<B>, policy: RetryPolicy) -> Self {
        Self {
            broker,
            policy,
            queues: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// The broker backing this pool
    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// The retry policy applied to every borrow
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` with a credential for `key`, retrying per the broker's verdicts
    pub async fn borrow<T, F, Fut>(&self, key: &B::Key, mut work: F) -> Result<T, B::Error>
    where
        F: FnMut(B::Credential) -> Fut,
        Fut: Future<Output = Result<T, B::Error>>,
    {
        let mut attempts: u32 = 0;
        let mut reauthorizations: u32 = 0;

        loop {
            let (verdict, error) = match self.checkout(key).await {
                Ok(credential) => match work(credential.clone()).await {
                    Ok(value) => {
                        self.checkin(key, credential).await;
                        return Ok(value);
                    }
                    Err(error) => {
                        let verdict = self.broker.classify(Some(&credential), &error);
                        if verdict.keeps_credential() {
                            self.checkin(key, credential).await;
                        } else {
                            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                            debug!(pool = ?key, ?verdict, "discarding credential");
                        }
                        (verdict, error)
                    }
                },
                Err(error) => (self.broker.classify(None, &error), error),
            };

            match verdict {
                Verdict::Fatal => return Err(error),
                Verdict::Reauthorize => {
                    if reauthorizations >= self.policy.max_reauthorizations {
                        return Err(self.broker.exhausted(key, attempts + 1, error));
                    }
                    reauthorizations += 1;
                    self.counters.reauthorizations.fetch_add(1, Ordering::Relaxed);
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(pool = ?key, %error, "authorization rejected, reauthorizing");
                    self.broker.reauthorize().await?;
                    continue;
                }
                Verdict::Keep | Verdict::Discard => {}
            }

            self.counters.retries.fetch_add(1, Ordering::Relaxed);

            if let Some(delay) = self.broker.retry_after(&error) {
                warn!(pool = ?key, %error, ?delay, "server asked to retry later");
                tokio::time::sleep(delay).await;
                continue;
            }

            attempts += 1;
            if !self.policy.allows_another(attempts) {
                warn!(pool = ?key, attempts, %error, "retry budget exhausted");
                return Err(self.broker.exhausted(key, attempts, error));
            }

            let delay = self.policy.delay_for(attempts);
            warn!(
                pool = ?key,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                ?delay,
                %error,
                "retrying with backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Drop every queued credential for `key`
    pub async fn evict(&self, key: &B::Key) -> usize {
        let mut queues = self.queues.lock().await;
        queues.remove(key).map(|queue| queue.len()).unwrap_or(0)
    }

    /// Number of idle credentials queued for `key`
    pub async fn idle(&self, key: &B::Key) -> usize {
        let queues = self.queues.lock().await;
        queues.get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            issued: self.counters.issued.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            reauthorizations: self.counters.reauthorizations.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    async fn checkout(&self, key: &B::Key) -> Result<B::Credential, B::Error> {
        let queued = {
            let mut queues = self.queues.lock().await;
            queues.get_mut(key).and_then(VecDeque::pop_front)
        };

        if let Some(credential) = queued {
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(credential);
        }

        debug!(pool = ?key, "no idle credential, issuing a new one");
        let credential = self.broker.issue(key).await?;
        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        Ok(credential)
    }

    async fn checkin(&self, key: &B::Key, credential: B::Credential) {
        let mut queues = self.queues.lock().await;
        queues.entry(key.clone()).or_default().push_back(credential);
    }
}
