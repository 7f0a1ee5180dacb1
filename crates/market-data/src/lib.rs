//! Lokifi Market Data Crate
//!
//! This crate provides resilient, provider-agnostic market data fetching for
//! the Lokifi server.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple upstream providers tried in a fixed priority order
//! - Per-provider rate limiting and circuit breaking
//! - Single-flight caching so concurrent identical requests hit upstream once
//! - Quality filtering of OHLC bars
//!
//! # Architecture
//!
//! ```text
//!                          +------------------+
//!                          |  ProviderManager |  (failover, priority order)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          | SingleFlightCache|  (TTL + in-flight dedup)
//!                          +------------------+
//!                                  |
//!                                  v
//!                   +-----------------------------+
//!                   | RateLimiter -> CircuitBreaker|  (owned per provider)
//!                   +-----------------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |   DataProvider   |  (CoinGecko, FMP, ...)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  Quality filter  |  (OHLC only)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`ProviderManager`] - Entry point for callers
//! - [`DataProvider`] - Capability implemented by each upstream
//! - [`Symbol`], [`OhlcBar`], [`OhlcQuery`], [`Timeframe`] - Data model
//! - [`ProviderError`] - The single error type, with a closed [`ProviderErrorCode`]

pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

// Re-export all public types from models
pub use models::{OhlcBar, OhlcQuery, ProviderId, Symbol, SymbolType, Timeframe, UnixSeconds};

// Re-export error types
pub use errors::{ProviderError, ProviderErrorCode, RetryClass};

// Re-export provider types
pub use provider::coingecko::CoinGeckoProvider;
pub use provider::fmp::FmpProvider;
pub use provider::DataProvider;

// Re-export registry types
pub use registry::{
    validate_ohlc_quality, CircuitBreaker, CircuitBreakerConfig, CircuitState, FetchDiagnostics,
    ManagerConfig, ProviderManager, ProviderStatus, RateLimitConfig, RateLimiter,
    SingleFlightCache,
};
