//! Provider resilience layer.
//!
//! This module provides orchestration for data providers, including:
//! - Ordered failover across providers
//! - Rate limiting per provider and operation
//! - Circuit breaking for fault tolerance
//! - Single-flight caching with TTLs
//! - OHLC quality filtering

mod cache;
mod circuit_breaker;
mod diagnostics;
mod manager;
mod rate_limiter;
mod validator;

pub use cache::SingleFlightCache;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use diagnostics::{FetchDiagnostics, ProviderAttempt};
pub use manager::{ManagerConfig, Operation, ProviderManager, ProviderStatus};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use validator::{
    validate_ohlc_quality, validate_ohlc_quality_with_report, DropReason, QualityReport,
};
