//! TTL cache with in-flight request de-duplication.
//!
//! [`SingleFlightCache`] collapses concurrent requests for the same key into
//! one upstream fetch (stampede protection) and keeps successful results for
//! a caller-supplied TTL. Expired entries are evicted lazily on the next
//! access; there is no background sweep.
//!
//! The fetch runs as its own task. A caller that stops waiting does not
//! cancel a fetch other callers are waiting on, and the task itself stores
//! the result and releases the in-flight slot on every outcome.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use log::{debug, warn};
use tokio::time::Instant;

use crate::errors::ProviderError;

/// Provider name used for failures of the cache machinery itself.
const CACHE_SOURCE: &str = "cache";

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ProviderError>>>;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    in_flight: HashMap<String, SharedFetch<V>>,
}

/// Lock the cache state, recovering from poison if necessary.
fn lock_state<V>(state: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Cache state mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Keyed TTL cache where at most one fetch per key runs at any instant.
pub struct SingleFlightCache<V> {
    name: &'static str,
    state: Arc<Mutex<CacheState<V>>>,
    etags: Mutex<HashMap<String, String>>,
}

impl<V> SingleFlightCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache. `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            etags: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, join an in-flight fetch for it,
    /// or start a new fetch with `fetch`.
    ///
    /// Only `Ok` results are cached, for `ttl` from the moment the fetch
    /// completes. An error is delivered to every caller waiting on that
    /// fetch and the next call starts a fresh one.
    ///
    /// `fetch` is called outside the lock on a miss. If another caller
    /// cached or started a fetch for `key` in the meantime, the future it
    /// built is dropped unpolled and that result is used instead.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProviderError>> + Send + 'static,
    {
        let found = self.lookup(&mut lock_state(&self.state), key);
        if let Some(found) = found {
            return found.resolve().await;
        }

        let future = fetch();

        let pending = {
            let mut state = lock_state(&self.state);

            // Re-check: a concurrent fetch may have finished or started.
            match self.lookup(&mut state, key) {
                Some(Lookup::Cached(value)) => return Ok(value),
                Some(Lookup::InFlight(pending)) => pending,
                None => {
                    debug!("[{}] Cache miss for '{}', fetching", self.name, key);
                    let task = tokio::spawn(run_fetch(
                        Arc::clone(&self.state),
                        self.name,
                        key.to_string(),
                        ttl,
                        future,
                    ));

                    let name = self.name;
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            warn!("[{}] Fetch task did not complete: {}", name, e);
                            Err(ProviderError::internal(
                                CACHE_SOURCE,
                                format!("Fetch task did not complete: {}", e),
                            ))
                        })
                    }
                    .boxed()
                    .shared();

                    state.in_flight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Live entry or in-flight fetch for `key`, evicting an expired entry.
    fn lookup(&self, state: &mut CacheState<V>, key: &str) -> Option<Lookup<V>> {
        let now = Instant::now();

        if let Some(entry) = state.entries.get(key) {
            if entry.is_live(now) {
                debug!("[{}] Cache hit for '{}'", self.name, key);
                return Some(Lookup::Cached(entry.value.clone()));
            }
            debug!("[{}] Evicting expired entry '{}'", self.name, key);
            state.entries.remove(key);
        }

        state.in_flight.get(key).map(|pending| {
            debug!("[{}] Joining in-flight fetch for '{}'", self.name, key);
            Lookup::InFlight(pending.clone())
        })
    }

    /// Drop the cached value for `key`. An in-flight fetch is not affected.
    pub fn invalidate(&self, key: &str) {
        lock_state(&self.state).entries.remove(key);
    }

    /// Drop every cached value.
    pub fn clear(&self) {
        lock_state(&self.state).entries.clear();
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock_state(&self.state)
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock_state(&self.state).in_flight.contains_key(key)
    }

    pub fn get_etag(&self, key: &str) -> Option<String> {
        self.lock_etags().get(key).cloned()
    }

    pub fn set_etag(&self, key: &str, etag: impl Into<String>) {
        self.lock_etags().insert(key.to_string(), etag.into());
    }

    fn lock_etags(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.etags.lock().unwrap_or_else(|poisoned| {
            warn!("[{}] ETag mutex was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }
}

enum Lookup<V> {
    Cached(V),
    InFlight(SharedFetch<V>),
}

impl<V: Clone> Lookup<V> {
    async fn resolve(self) -> Result<V, ProviderError> {
        match self {
            Lookup::Cached(value) => Ok(value),
            Lookup::InFlight(pending) => pending.await,
        }
    }
}

/// Body of the spawned fetch task.
async fn run_fetch<V, Fut>(
    state: Arc<Mutex<CacheState<V>>>,
    name: &'static str,
    key: String,
    ttl: Duration,
    future: Fut,
) -> Result<V, ProviderError>
where
    V: Clone,
    Fut: Future<Output = Result<V, ProviderError>>,
{
    let result = AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            warn!("[{}] Fetch for '{}' panicked", name, key);
            Err(ProviderError::internal(
                CACHE_SOURCE,
                format!("Fetch for '{}' panicked", key),
            ))
        });

    let mut state = lock_state(&state);
    if let Ok(value) = &result {
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
    state.in_flight.remove(&key);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        result: Result<u32, ProviderError>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, ProviderError>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..10).map(|_| {
            cache.get_or_fetch(
                "symbols",
                TTL,
                counting_fetch(&calls, Duration::from_millis(100), Ok(42)),
            )
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(42)));
        assert!(!cache.is_in_flight("symbols"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_cached_while_building_fetch_wins() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(&calls, Duration::ZERO, Ok(2));

        let result = cache
            .get_or_fetch("symbols", TTL, || {
                // Another caller's fetch completes before this one registers.
                lock_state(&cache.state).entries.insert(
                    "symbols".to_string(),
                    CacheEntry {
                        value: 1,
                        expires_at: Instant::now() + TTL,
                    },
                );
                fetch()
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!cache.is_in_flight("symbols"));

        // The live entry was not overwritten.
        let again = cache
            .get_or_fetch("symbols", TTL, counting_fetch(&calls, Duration::ZERO, Ok(3)))
            .await;
        assert_eq!(again, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_shared_and_not_cached() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let error = ProviderError::network("A", "connection reset");

        let callers = (0..5).map(|_| {
            cache.get_or_fetch(
                "ohlc",
                TTL,
                counting_fetch(&calls, Duration::from_millis(50), Err(error.clone())),
            )
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Err(error.clone())));
        assert!(cache.is_empty());

        let retried = cache
            .get_or_fetch("ohlc", TTL, counting_fetch(&calls, Duration::ZERO, Ok(1)))
            .await;
        assert_eq!(retried, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_fetch("k", TTL, counting_fetch(&calls, Duration::ZERO, Ok(1)))
            .await;
        assert_eq!(first, Ok(1));

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        let cached = cache
            .get_or_fetch("k", TTL, counting_fetch(&calls, Duration::ZERO, Ok(2)))
            .await;
        assert_eq!(cached, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Exactly at expires_at the entry is stale.
        tokio::time::advance(Duration::from_secs(1)).await;
        let refreshed = cache
            .get_or_fetch("k", TTL, counting_fetch(&calls, Duration::ZERO, Ok(3)))
            .await;
        assert_eq!(refreshed, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get_or_fetch("a", TTL, counting_fetch(&calls, Duration::from_millis(10), Ok(1))),
            cache.get_or_fetch("b", TTL, counting_fetch(&calls, Duration::from_millis(10), Ok(2))),
        );

        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_does_not_cancel_fetch() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_or_fetch("k", TTL, counting_fetch(&calls, Duration::from_millis(100), Ok(7))),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;

        let value = cache
            .get_or_fetch("k", TTL, counting_fetch(&calls, Duration::ZERO, Ok(8)))
            .await;
        assert_eq!(value, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_fetch_becomes_internal_error() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new("test");

        let result = cache
            .get_or_fetch("k", TTL, || async {
                let parsed: Option<u32> = None;
                Ok(parsed.expect("upstream parser bug"))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InternalError);
        assert!(!cache.is_in_flight("k"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = SingleFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            cache
                .get_or_fetch(key, TTL, counting_fetch(&calls, Duration::ZERO, Ok(1)))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);

        cache.invalidate("a");
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_etag_store_is_independent_of_entries() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new("test");
        assert!(cache.get_etag("symbols").is_none());

        cache.set_etag("symbols", "W/\"abc\"");
        assert_eq!(cache.get_etag("symbols").as_deref(), Some("W/\"abc\""));
        assert!(cache.is_empty());
    }
}
