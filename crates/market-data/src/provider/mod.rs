//! Data provider abstraction and implementations.
//!
//! This module contains:
//! - The `DataProvider` trait that all providers implement
//! - Shared HTTP status and payload handling
//! - Concrete provider implementations (CoinGecko, FMP)
//!
//! Providers only talk to their upstream. Rate limiting, circuit breaking,
//! caching and failover are applied around them by the
//! [`ProviderManager`](crate::registry::ProviderManager).

mod http;
mod traits;

pub mod coingecko;
pub mod fmp;

pub use traits::DataProvider;
