//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent hammering a provider
//! that is experiencing issues. The circuit has three states:
//!
//! - **Closed**: Normal operation, calls go through.
//! - **Open**: Provider is failing, calls fail fast without reaching it.
//! - **HalfOpen**: Recovery timeout elapsed, the next call is a trial.
//!
//! Each provider owns exactly one breaker. The breaker is in-memory and
//! resets on application restart.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;

use crate::errors::ProviderError;
use crate::models::ProviderId;

/// Default number of failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Provider is failing - calls fail fast.
    Open,
    /// Testing recovery - the next call is let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Internal circuit state.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Failures since the last success.
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Failure gate around one provider's upstream calls.
pub struct CircuitBreaker {
    provider: ProviderId,
    circuit: Mutex<Circuit>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a breaker for `provider` with default settings.
    pub fn new(provider: impl Into<ProviderId>) -> Self {
        Self::with_config(provider, CircuitBreakerConfig::default())
    }

    pub fn with_config(provider: impl Into<ProviderId>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            circuit: Mutex::new(Circuit::new()),
            config,
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!(
                "Circuit breaker mutex for '{}' was poisoned, recovering",
                self.provider
            );
            poisoned.into_inner()
        })
    }

    /// Run `operation` through the breaker.
    ///
    /// While the circuit is open and the recovery timeout has not elapsed,
    /// fails immediately with `PROVIDER_UNAVAILABLE` without invoking
    /// `operation`. Otherwise the operation runs; its error is counted and
    /// returned unchanged.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.before_call()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Gate check, moving Open -> HalfOpen once the recovery timeout passed.
    fn before_call(&self) -> Result<(), ProviderError> {
        let mut circuit = self.lock_circuit();

        if circuit.state != CircuitState::Open {
            return Ok(());
        }

        let recovered = circuit
            .last_failure
            .map_or(true, |at| at.elapsed() > self.config.recovery_timeout);

        if recovered {
            info!(
                "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                self.provider
            );
            circuit.state = CircuitState::HalfOpen;
            Ok(())
        } else {
            debug!("Circuit breaker: '{}' is open, failing fast", self.provider);
            Err(ProviderError::unavailable(
                self.provider.as_ref(),
                "Circuit breaker is open",
            ))
        }
    }

    /// A success closes a HalfOpen circuit and clears the failure count.
    ///
    /// An Open circuit only leaves through the recovery timeout, so a late
    /// success from a call started before the circuit opened is ignored.
    fn record_success(&self) {
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: ignoring late success for open circuit '{}'",
                    self.provider
                );
                return;
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful trial",
                    self.provider
                );
            }
            CircuitState::Closed => {}
        }
        circuit.state = CircuitState::Closed;
        circuit.failure_count = 0;
    }

    /// Count a failure; open the circuit once the threshold is reached.
    ///
    /// A failed HalfOpen trial reopens through the same path because the
    /// failure count is only cleared by a success.
    fn record_failure(&self) {
        let mut circuit = self.lock_circuit();

        circuit.failure_count += 1;
        circuit.last_failure = Some(Instant::now());

        if circuit.failure_count >= self.config.failure_threshold {
            if circuit.state != CircuitState::Open {
                info!(
                    "Circuit breaker: opening circuit for '{}' after {} failures",
                    self.provider, circuit.failure_count
                );
            }
            circuit.state = CircuitState::Open;
        } else {
            debug!(
                "Circuit breaker: failure for '{}' ({}/{})",
                self.provider, circuit.failure_count, self.config.failure_threshold
            );
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock_circuit().failure_count
    }

    /// Force the circuit back to Closed.
    pub fn reset(&self) {
        let mut circuit = self.lock_circuit();
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            self.provider
        );
        *circuit = Circuit::new();
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let circuit = self.lock_circuit();
        CircuitMetrics {
            provider: self.provider.to_string(),
            state: circuit.state,
            failure_count: circuit.failure_count,
            last_failure: circuit.last_failure,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}
