//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`ProviderError`]: The single error type raised by providers and the resilience layer
//! - [`ProviderErrorCode`]: The closed set of failure codes a caller can switch on
//! - [`RetryClass`]: Classification for deciding how a caller should react

mod retry;

pub use retry::RetryClass;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider name used when an error is not attributable to a single upstream.
pub const ALL_PROVIDERS: &str = "all";

/// Closed set of failure codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    /// Upstream rejected the request because of its rate limit (HTTP 429).
    RateLimited,
    /// The symbol is unknown to the provider.
    SymbolNotFound,
    /// The provider cannot serve the requested timeframe.
    InvalidTimeframe,
    /// Transport-level failure (connect, timeout, reset).
    NetworkError,
    /// Credentials were missing or rejected.
    AuthenticationError,
    /// The plan's request quota is exhausted.
    QuotaExceeded,
    /// Provider is down, or its circuit breaker is open.
    ProviderUnavailable,
    /// The provider answered with data we cannot use.
    DataQualityError,
    /// Anything else.
    InternalError,
}

impl ProviderErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::SymbolNotFound => "SYMBOL_NOT_FOUND",
            Self::InvalidTimeframe => "INVALID_TIMEFRAME",
            Self::NetworkError => "NETWORK_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::DataQualityError => "DATA_QUALITY_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns the retry classification for this code.
    ///
    /// The provider manager does not consult this during failover (every
    /// failure moves on to the next provider); it is meant for callers that
    /// must decide between retrying, backing off, or surfacing the error.
    ///
    /// # Examples
    ///
    /// ```
    /// use lokifi_market_data::errors::{ProviderErrorCode, RetryClass};
    ///
    /// assert_eq!(ProviderErrorCode::RateLimited.retry_class(), RetryClass::WithBackoff);
    /// assert_eq!(ProviderErrorCode::SymbolNotFound.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited | Self::QuotaExceeded => RetryClass::WithBackoff,

            Self::NetworkError | Self::ProviderUnavailable | Self::InternalError => {
                RetryClass::Transient
            }

            Self::SymbolNotFound
            | Self::InvalidTimeframe
            | Self::AuthenticationError
            | Self::DataQualityError => RetryClass::Never,
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a data provider or by the resilience layer around it.
///
/// The error is `Clone` so that a single failed upstream fetch can be handed
/// to every caller waiting on the same in-flight request.
#[derive(Error, Clone, Debug, PartialEq)]
#[error("[{provider}] {code}: {message}")]
pub struct ProviderError {
    /// Human readable description.
    pub message: String,
    /// Machine readable failure code.
    pub code: ProviderErrorCode,
    /// Provider that raised the error, or `"all"`.
    pub provider: String,
    /// Seconds the upstream asked us to wait, if it said so.
    pub retry_after: Option<u64>,
    /// Extra structured context from the upstream response.
    pub details: Option<serde_json::Value>,
}

impl ProviderError {
    pub fn new(
        code: ProviderErrorCode,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            code,
            provider: provider.into(),
            retry_after: None,
            details: None,
        }
    }

    /// Attach the upstream's requested wait, in seconds.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self {
            retry_after,
            ..Self::new(
                ProviderErrorCode::RateLimited,
                provider,
                "Rate limit exceeded",
            )
        }
    }

    pub fn symbol_not_found(provider: impl Into<String>, symbol: &str) -> Self {
        Self::new(
            ProviderErrorCode::SymbolNotFound,
            provider,
            format!("Symbol not found: {}", symbol),
        )
    }

    pub fn invalid_timeframe(provider: impl Into<String>, timeframe: &str) -> Self {
        Self::new(
            ProviderErrorCode::InvalidTimeframe,
            provider,
            format!("Unsupported timeframe: {}", timeframe),
        )
    }

    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, provider, message)
    }

    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ProviderUnavailable, provider, message)
    }

    pub fn data_quality(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::DataQualityError, provider, message)
    }

    pub fn internal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InternalError, provider, message)
    }

    /// Raised when a manager has no providers registered at all.
    pub fn no_providers() -> Self {
        Self::unavailable(ALL_PROVIDERS, "No data providers are configured")
    }

    /// Shorthand for `self.code.retry_class()`.
    pub fn retry_class(&self) -> RetryClass {
        self.code.retry_class()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ProviderErrorCode::RateLimited
    }
}
