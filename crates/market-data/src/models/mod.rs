//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for common identifiers (ProviderId, UnixSeconds)
//! - `symbol` - Tradable instrument listing returned by providers (Symbol)
//! - `ohlc` - Price bars and the request that produces them (OhlcBar, OhlcQuery)
//! - `timeframe` - Bar interval (Timeframe)

mod ohlc;
mod symbol;
mod timeframe;
mod types;

pub use ohlc::{OhlcBar, OhlcQuery, DEFAULT_OHLC_LIMIT};
pub use symbol::{Symbol, SymbolType};
pub use timeframe::Timeframe;
pub use types::{ProviderId, UnixSeconds};
