//! Provider manager for orchestrating market data providers.
//!
//! The manager owns an ordered list of providers and a single-flight cache
//! per operation. Every request goes through the cache first; on a miss the
//! providers are tried in insertion order until one succeeds:
//!
//! 1. Acquire a token from the provider's rate limiter (may wait)
//! 2. Call the provider through its circuit breaker
//! 3. For OHLC, run the quality filter on the result
//!
//! On a `RATE_LIMITED` failure the provider's rate limiter is told to back
//! off for the upstream's `retry_after` (or the configured default). When
//! every provider fails, the last provider's error is returned and the full
//! attempt history is logged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use super::cache::SingleFlightCache;
use super::circuit_breaker::CircuitState;
use super::diagnostics::FetchDiagnostics;
use crate::errors::ProviderError;
use crate::models::{OhlcBar, OhlcQuery, Symbol};
use crate::provider::DataProvider;

/// Cache key for the symbol list.
const SYMBOLS_CACHE_KEY: &str = "symbols";

/// Operation a request is for. Also names the rate limiter key suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Symbols,
    Ohlc,
    Logo,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symbols => "symbols",
            Self::Ohlc => "ohlc",
            Self::Logo => "logo",
        }
    }

    /// Rate limiter key for this operation on `provider_id`.
    pub fn rate_limit_key(&self, provider_id: &str) -> String {
        format!("{}:{}", provider_id, self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache lifetimes and failover settings.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub symbols_ttl: Duration,
    pub ohlc_ttl: Duration,
    pub logo_ttl: Duration,
    /// Backoff imposed after `RATE_LIMITED` when the upstream gave no `retry_after`.
    pub default_rate_limit_backoff: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            symbols_ttl: Duration::from_secs(3600),
            ohlc_ttl: Duration::from_secs(60),
            logo_ttl: Duration::from_secs(24 * 3600),
            default_rate_limit_backoff: Duration::from_secs(60),
        }
    }
}

/// Health snapshot of one provider.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: &'static str,
    pub priority: usize,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
}

/// Ordered failover across data providers, fronted by single-flight caches.
pub struct ProviderManager {
    providers: Vec<Arc<dyn DataProvider>>,
    config: ManagerConfig,
    symbols_cache: SingleFlightCache<Vec<Symbol>>,
    ohlc_cache: SingleFlightCache<Vec<OhlcBar>>,
    logo_cache: SingleFlightCache<Option<String>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self {
            providers: Vec::new(),
            config,
            symbols_cache: SingleFlightCache::new("symbols"),
            ohlc_cache: SingleFlightCache::new("ohlc"),
            logo_cache: SingleFlightCache::new("logo"),
        }
    }

    /// Append a provider. Earlier providers are tried first.
    pub fn add_provider(&mut self, provider: Arc<dyn DataProvider>) {
        info!(
            "Registered data provider '{}' at priority {}",
            provider.id(),
            self.providers.len()
        );
        self.providers.push(provider);
    }

    /// Get the list of providers in priority order.
    pub fn providers(&self) -> &[Arc<dyn DataProvider>] {
        &self.providers
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Circuit state of every provider, in priority order.
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .enumerate()
            .map(|(priority, provider)| {
                let metrics = provider.circuit_breaker().metrics();
                ProviderStatus {
                    id: provider.id(),
                    priority,
                    circuit_state: metrics.state,
                    failure_count: metrics.failure_count,
                }
            })
            .collect()
    }

    /// Every symbol from the first provider that can list them.
    pub async fn get_symbols(&self) -> Result<Vec<Symbol>, ProviderError> {
        let providers = self.providers.clone();
        let backoff = self.config.default_rate_limit_backoff;

        self.symbols_cache
            .get_or_fetch(SYMBOLS_CACHE_KEY, self.config.symbols_ttl, move || {
                Self::symbols_with_failover(providers, backoff)
            })
            .await
    }

    /// Quality-filtered OHLC bars from the first provider that can serve `query`.
    pub async fn get_ohlc(&self, query: OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError> {
        let key = query.cache_key();
        let providers = self.providers.clone();
        let backoff = self.config.default_rate_limit_backoff;

        self.ohlc_cache
            .get_or_fetch(&key, self.config.ohlc_ttl, move || {
                Self::ohlc_with_failover(providers, query, backoff)
            })
            .await
    }

    /// Logo URL for `symbol` from the first provider that has one.
    ///
    /// `Ok(None)` when every provider that answered had no logo.
    pub async fn get_logo(&self, symbol: &str) -> Result<Option<String>, ProviderError> {
        let key = format!("logo:{}", symbol);
        let providers = self.providers.clone();
        let symbol = symbol.to_string();
        let backoff = self.config.default_rate_limit_backoff;

        self.logo_cache
            .get_or_fetch(&key, self.config.logo_ttl, move || {
                Self::logo_with_failover(providers, symbol, backoff)
            })
            .await
    }

    async fn symbols_with_failover(
        providers: Vec<Arc<dyn DataProvider>>,
        default_backoff: Duration,
    ) -> Result<Vec<Symbol>, ProviderError> {
        let operation = Operation::Symbols;
        if providers.is_empty() {
            return Err(no_providers(operation));
        }

        let mut diagnostics = FetchDiagnostics::new();
        let mut last_error: Option<ProviderError> = None;

        for provider in &providers {
            let result = attempt(provider.as_ref(), operation, default_backoff, || {
                provider.get_symbols()
            })
            .await;

            match result {
                Ok(symbols) => {
                    diagnostics.record_success(provider.id().into());
                    debug!(
                        "Fetched {} symbols from '{}'",
                        symbols.len(),
                        provider.id()
                    );
                    return Ok(symbols);
                }
                Err(e) => {
                    diagnostics.record_error(provider.id().into(), e.clone());
                    last_error = Some(e);
                }
            }
        }

        Err(exhausted(operation, &diagnostics, last_error))
    }

    async fn ohlc_with_failover(
        providers: Vec<Arc<dyn DataProvider>>,
        query: OhlcQuery,
        default_backoff: Duration,
    ) -> Result<Vec<OhlcBar>, ProviderError> {
        let operation = Operation::Ohlc;
        if providers.is_empty() {
            return Err(no_providers(operation));
        }

        let mut diagnostics = FetchDiagnostics::new();
        let mut last_error: Option<ProviderError> = None;

        for provider in &providers {
            let result = attempt(provider.as_ref(), operation, default_backoff, || {
                provider.get_ohlc(&query)
            })
            .await;

            match result {
                Ok(bars) => {
                    diagnostics.record_success(provider.id().into());
                    let bars = provider.validate_ohlc_quality(bars);
                    debug!(
                        "Fetched {} {} bars for {} from '{}'",
                        bars.len(),
                        query.timeframe,
                        query.symbol,
                        provider.id()
                    );
                    return Ok(bars);
                }
                Err(e) => {
                    diagnostics.record_error(provider.id().into(), e.clone());
                    last_error = Some(e);
                }
            }
        }

        Err(exhausted(operation, &diagnostics, last_error))
    }

    async fn logo_with_failover(
        providers: Vec<Arc<dyn DataProvider>>,
        symbol: String,
        default_backoff: Duration,
    ) -> Result<Option<String>, ProviderError> {
        let operation = Operation::Logo;
        if providers.is_empty() {
            return Err(no_providers(operation));
        }

        let mut diagnostics = FetchDiagnostics::new();
        let mut last_error: Option<ProviderError> = None;
        let mut answered = false;

        for provider in &providers {
            let result = attempt(provider.as_ref(), operation, default_backoff, || {
                provider.get_logo(&symbol)
            })
            .await;

            match result {
                Ok(Some(url)) => {
                    diagnostics.record_success(provider.id().into());
                    return Ok(Some(url));
                }
                Ok(None) => {
                    debug!("Provider '{}' has no logo for {}", provider.id(), symbol);
                    answered = true;
                }
                Err(e) => {
                    diagnostics.record_error(provider.id().into(), e.clone());
                    last_error = Some(e);
                }
            }
        }

        if answered {
            return Ok(None);
        }
        Err(exhausted(operation, &diagnostics, last_error))
    }
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

/// One rate-limited, circuit-broken call to `provider`.
///
/// A `RATE_LIMITED` error makes the provider's rate limiter back off for the
/// upstream's `retry_after`, or `default_backoff` when none was given.
async fn attempt<T, F, Fut>(
    provider: &dyn DataProvider,
    operation: Operation,
    default_backoff: Duration,
    call: F,
) -> Result<T, ProviderError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let key = operation.rate_limit_key(provider.id());
    provider
        .rate_limiter()
        .acquire(&key, provider.rate_limit())
        .await;

    debug!("Trying provider '{}' for {}", provider.id(), operation);
    let result = provider.circuit_breaker().call(call).await;

    if let Err(e) = &result {
        if e.is_rate_limited() {
            let backoff = e
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(default_backoff);
            provider.rate_limiter().set_backoff(&key, backoff);
        }
        warn!(
            "Provider '{}' failed for {}: {}, trying next",
            provider.id(),
            operation,
            e
        );
    }

    result
}

fn no_providers(operation: Operation) -> ProviderError {
    warn!("No data providers registered, cannot serve {}", operation);
    ProviderError::no_providers()
}

/// Error to surface once every provider failed: the last one's, verbatim.
fn exhausted(
    operation: Operation,
    diagnostics: &FetchDiagnostics,
    last_error: Option<ProviderError>,
) -> ProviderError {
    warn!(
        "All providers failed for {}: {}",
        operation,
        diagnostics.summary()
    );
    last_error.unwrap_or_else(ProviderError::no_providers)
}
