//! Scripted in-memory provider shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lokifi_market_data::{
    CircuitBreaker, CircuitBreakerConfig, DataProvider, OhlcBar, OhlcQuery, ProviderError,
    RateLimiter, Symbol,
};

/// Provider that returns fixed results and counts how often it was called.
pub struct MockProvider {
    id: &'static str,
    symbols: Result<Vec<Symbol>, ProviderError>,
    ohlc: Result<Vec<OhlcBar>, ProviderError>,
    logo: Result<Option<String>, ProviderError>,
    delay: Duration,
    symbols_calls: AtomicUsize,
    ohlc_calls: AtomicUsize,
    logo_calls: AtomicUsize,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl MockProvider {
    /// A healthy provider: one symbol, three clean bars, no logo.
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            symbols: Ok(vec![Symbol::spot(
                format!("{}USD", id),
                id,
                id,
                "USD",
                id,
            )]),
            ohlc: Ok(clean_bars(&[1, 2, 3])),
            logo: Ok(None),
            delay: Duration::ZERO,
            symbols_calls: AtomicUsize::new(0),
            ohlc_calls: AtomicUsize::new(0),
            logo_calls: AtomicUsize::new(0),
            rate_limiter: RateLimiter::new(),
            circuit_breaker: CircuitBreaker::new(id),
        }
    }

    pub fn with_symbols(mut self, symbols: Result<Vec<Symbol>, ProviderError>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_ohlc(mut self, ohlc: Result<Vec<OhlcBar>, ProviderError>) -> Self {
        self.ohlc = ohlc;
        self
    }

    pub fn with_logo(mut self, logo: Result<Option<String>, ProviderError>) -> Self {
        self.logo = logo;
        self
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = CircuitBreaker::with_config(self.id, config);
        self
    }

    pub fn symbols_calls(&self) -> usize {
        self.symbols_calls.load(Ordering::SeqCst)
    }

    pub fn ohlc_calls(&self) -> usize {
        self.ohlc_calls.load(Ordering::SeqCst)
    }

    pub fn logo_calls(&self) -> usize {
        self.logo_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl DataProvider for MockProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    async fn get_symbols(&self) -> Result<Vec<Symbol>, ProviderError> {
        self.symbols_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.symbols.clone()
    }

    async fn get_ohlc(&self, _query: &OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError> {
        self.ohlc_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.ohlc.clone()
    }

    async fn get_logo(&self, _symbol: &str) -> Result<Option<String>, ProviderError> {
        self.logo_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.logo.clone()
    }
}

/// Well-formed bars at the given timestamps.
pub fn clean_bars(timestamps: &[i64]) -> Vec<OhlcBar> {
    timestamps
        .iter()
        .map(|ts| OhlcBar::new(*ts, 100.0, 110.0, 90.0, 105.0, 1_000.0))
        .collect()
}
