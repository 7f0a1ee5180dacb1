//! Sliding window rate limiter for market data providers.
//!
//! Counts requests per key (`"{provider}:{operation}"`) over a sliding
//! window. When a key is over its budget the caller is suspended for an
//! exponential backoff instead of being rejected. Callers can also impose an
//! explicit backoff deadline, e.g. after an upstream answered HTTP 429.
//!
//! State is in-memory and resets on application restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// Default number of requests allowed per window.
const DEFAULT_MAX_REQUESTS: u32 = 100;

/// Default window length.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound for the computed overflow backoff, in seconds.
const MAX_BACKOFF_SECS: u64 = 300;

/// Rate limit budget for one key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum requests inside one window.
    pub max_requests: u32,
    /// Sliding window length.
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Request history for a single key.
#[derive(Debug, Default)]
struct RequestWindow {
    /// Times of recent requests, oldest first.
    requests: VecDeque<Instant>,
    /// No request may be granted before this instant.
    backoff_until: Option<Instant>,
}

impl RequestWindow {
    /// Drop requests that fell out of the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.requests.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    /// Active backoff deadline, clearing it once it has passed.
    fn active_backoff(&mut self, now: Instant) -> Option<Instant> {
        match self.backoff_until {
            Some(until) if until > now => Some(until),
            Some(_) => {
                self.backoff_until = None;
                None
            }
            None => None,
        }
    }
}

/// `min(300, 2^count)` seconds.
fn overflow_backoff(count: usize) -> Duration {
    let exponent = u32::try_from(count).unwrap_or(u32::MAX);
    let seconds = 2u64.saturating_pow(exponent).min(MAX_BACKOFF_SECS);
    Duration::from_secs(seconds)
}

/// Per-key sliding window rate limiter.
///
/// Thread-safe; critical sections never span an `.await`, so the lock is a
/// plain mutex. One instance is owned by each provider and shared by every
/// caller of that provider.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RequestWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the windows mutex, recovering from poison if necessary.
    ///
    /// The worst case after recovery is a slightly wrong request count.
    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, RequestWindow>> {
        self.windows.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Acquire a request slot for `key`.
    ///
    /// Suspends (never rejects) while an explicit backoff for the key is
    /// active. If the window is already full, an exponential backoff of
    /// `min(300, 2^count)` seconds is recorded for the key and the caller
    /// sleeps through it before its request is counted.
    pub async fn acquire(&self, key: &str, limit: RateLimitConfig) {
        loop {
            let deadline = {
                let mut windows = self.lock_windows();
                let window = windows.entry(key.to_string()).or_default();
                let now = Instant::now();

                if let Some(until) = window.active_backoff(now) {
                    Some((until, false))
                } else {
                    window.prune(now, limit.window);
                    let count = window.requests.len();

                    if count >= limit.max_requests as usize {
                        let backoff = overflow_backoff(count);
                        let until = now + backoff;
                        window.backoff_until = Some(until);
                        warn!(
                            "Rate limiter: '{}' over budget ({} in {:?}), backing off {:?}",
                            key, count, limit.window, backoff
                        );
                        Some((until, true))
                    } else {
                        window.requests.push_back(now);
                        debug!(
                            "Rate limiter: acquired slot for '{}' ({}/{})",
                            key,
                            count + 1,
                            limit.max_requests
                        );
                        None
                    }
                }
            };

            match deadline {
                None => return,
                Some((until, overflowed)) => {
                    debug!(
                        "Rate limiter: waiting {:?} for '{}'",
                        until.saturating_duration_since(Instant::now()),
                        key
                    );
                    tokio::time::sleep_until(until).await;

                    if overflowed {
                        // The overflow backoff itself is the cost of this request.
                        let mut windows = self.lock_windows();
                        let window = windows.entry(key.to_string()).or_default();
                        window.requests.push_back(Instant::now());
                        return;
                    }
                }
            }
        }
    }

    /// Impose an explicit backoff on `key`.
    ///
    /// Subsequent [`acquire`](Self::acquire) calls for the key suspend until
    /// the deadline passes. The new deadline replaces any active one, so an
    /// upstream `retry_after` shorter than an overflow backoff takes effect
    /// for callers arriving after it.
    pub fn set_backoff(&self, key: &str, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut windows = self.lock_windows();
        windows.entry(key.to_string()).or_default().backoff_until = Some(until);
        warn!("Rate limiter: backoff of {:?} imposed on '{}'", retry_after, key);
    }

    /// Active backoff deadline for `key`, if any.
    pub fn backoff_deadline(&self, key: &str) -> Option<Instant> {
        let mut windows = self.lock_windows();
        windows
            .get_mut(key)
            .and_then(|window| window.active_backoff(Instant::now()))
    }

    /// Number of requests recorded for `key` inside `window`.
    pub fn request_count(&self, key: &str, window: Duration) -> usize {
        let mut windows = self.lock_windows();
        match windows.get_mut(key) {
            Some(w) => {
                w.prune(Instant::now(), window);
                w.requests.len()
            }
            None => 0,
        }
    }

    /// Forget all history and backoff for `key`.
    pub fn reset(&self, key: &str) {
        let mut windows = self.lock_windows();
        windows.remove(key);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
