//! Single-flight, time-boxed memoization of an async computation
//!
//! Concurrent callers of [`SingleFlight::run`] share one in-flight future.
//! A successful result is cached for the configured TTL; a failed result is
//! not cached, so the next caller starts a fresh flight.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

enum FlightState<T, E>
where
    T: Clone,
    E: Clone,
{
    Idle,
    InFlight { flight: Flight<T, E>, generation: u64 },
    Ready { value: T, at: Instant },
}

/// Deduplicating cache for a single async value
///
/// # Example
///
/// ```
/// use b2lift_core_resilience::SingleFlight;
/// use std::time::Duration;
///
/// # async fn example() {
/// let auth: SingleFlight<String, String> = SingleFlight::new(Duration::from_secs(600));
///
/// let token = auth
///     .run(|| async { Ok::<_, String>("token".to_string()) })
///     .await
///     .unwrap();
/// assert_eq!(token, "token");
/// # }
/// ```
pub struct SingleFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    ttl: Duration,
    state: Mutex<FlightState<T, E>>,
    generation: AtomicU64,
    runs: AtomicU64,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty cache whose successful results live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(FlightState::Idle),
            generation: AtomicU64::new(0),
            runs: AtomicU64::new(0),
        }
    }

    /// Return the cached value, join the flight in progress, or start one
    pub async fn run<F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (flight, generation) = {
            let mut state = self.state.lock().await;

            if let FlightState::Ready { value, at } = &*state {
                if at.elapsed() < self.ttl {
                    return Ok(value.clone());
                }
            }

            let joined = match &*state {
                FlightState::InFlight { flight, generation } => {
                    Some((flight.clone(), *generation))
                }
                _ => None,
            };

            match joined {
                Some(joined) => joined,
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    self.runs.fetch_add(1, Ordering::SeqCst);
                    let flight = operation().boxed().shared();
                    *state = FlightState::InFlight {
                        flight: flight.clone(),
                        generation,
                    };
                    (flight, generation)
                }
            }
        };

        let result = flight.await;

        let mut state = self.state.lock().await;
        let current = matches!(
            &*state,
            FlightState::InFlight { generation: g, .. } if *g == generation
        );
        if current {
            *state = match &result {
                Ok(value) => FlightState::Ready {
                    value: value.clone(),
                    at: Instant::now(),
                },
                Err(_) => FlightState::Idle,
            };
        }

        result
    }

    /// Forget any cached value; an in-flight computation is left to finish
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, FlightState::Ready { .. }) {
            *state = FlightState::Idle;
        }
    }

    /// Number of times the underlying operation has actually been started
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_flight() {
        let cache = Arc::new(SingleFlight::<u32, String>::new(Duration::from_secs(600)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .run(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let cache = SingleFlight::<u32, String>::new(Duration::from_secs(600));

        assert_eq!(cache.run(|| async { Ok(1) }).await, Ok(1));
        assert_eq!(cache.run(|| async { Ok(2) }).await, Ok(1));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(cache.run(|| async { Ok(3) }).await, Ok(3));
        assert_eq!(cache.runs(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = SingleFlight::<u32, String>::new(Duration::from_secs(600));

        let first = cache.run(|| async { Err("boom".to_string()) }).await;
        assert_eq!(first, Err("boom".to_string()));

        let second = cache.run(|| async { Ok(9) }).await;
        assert_eq!(second, Ok(9));
        assert_eq!(cache.runs(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = SingleFlight::<u32, String>::new(Duration::from_secs(600));
        cache.run(|| async { Ok(1) }).await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.run(|| async { Ok(2) }).await, Ok(2));
    }
}
