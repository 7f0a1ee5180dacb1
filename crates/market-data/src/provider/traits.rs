//! Data provider trait definition.
//!
//! This module defines the core `DataProvider` trait that all upstream
//! market data sources implement.

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::models::{OhlcBar, OhlcQuery, Symbol};
use crate::registry::{validate_ohlc_quality, CircuitBreaker, RateLimitConfig, RateLimiter};

/// Trait for market data providers.
///
/// Implement this trait to add support for a new market data source. Each
/// provider owns one [`RateLimiter`] and one [`CircuitBreaker`], created at
/// construction and never shared with another provider. The
/// [`ProviderManager`](crate::registry::ProviderManager) routes every call
/// through them; implementations only talk to their upstream.
///
/// Any error an implementation returns is treated as a provider failure
/// and triggers failover to the next provider.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use lokifi_market_data::provider::DataProvider;
/// use lokifi_market_data::registry::{CircuitBreaker, RateLimiter};
///
/// struct MyProvider {
///     rate_limiter: RateLimiter,
///     circuit_breaker: CircuitBreaker,
/// }
///
/// #[async_trait]
/// impl DataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn rate_limiter(&self) -> &RateLimiter {
///         &self.rate_limiter
///     }
///
///     fn circuit_breaker(&self) -> &CircuitBreaker {
///         &self.circuit_breaker
///     }
///
///     // ... implement get_symbols, get_ohlc and get_logo
/// }
/// ```
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "COINGECKO" or "FMP". Used for
    /// logging, rate limiter keys and error attribution.
    fn id(&self) -> &'static str;

    /// The provider's own rate limiter.
    fn rate_limiter(&self) -> &RateLimiter;

    /// The provider's own circuit breaker.
    fn circuit_breaker(&self) -> &CircuitBreaker;

    /// Request budget per operation key. Default is 100 requests per 60s.
    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    /// Fetch every symbol the provider lists.
    async fn get_symbols(&self) -> Result<Vec<Symbol>, ProviderError>;

    /// Fetch OHLC bars for `query`.
    ///
    /// Bars should be ordered by timestamp ascending. They are passed through
    /// [`validate_ohlc_quality`](Self::validate_ohlc_quality) by the manager,
    /// so implementations do not need to filter malformed bars themselves.
    async fn get_ohlc(&self, query: &OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError>;

    /// Fetch a logo URL for `symbol`, or `None` if the provider has none.
    async fn get_logo(&self, symbol: &str) -> Result<Option<String>, ProviderError>;

    /// Drop malformed, duplicate and out-of-order bars.
    fn validate_ohlc_quality(&self, bars: Vec<OhlcBar>) -> Vec<OhlcBar> {
        validate_ohlc_quality(bars)
    }
}
