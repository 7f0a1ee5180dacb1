use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;
use super::types::UnixSeconds;

/// Number of bars requested when the caller does not say.
pub const DEFAULT_OHLC_LIMIT: usize = 500;

/// One time-bucketed price summary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    /// Bucket start, unix seconds
    pub timestamp: UnixSeconds,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcBar {
    pub fn new(
        timestamp: UnixSeconds,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// All four prices are strictly positive (NaN fails).
    pub fn has_positive_prices(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|price| *price > 0.0)
    }

    /// `low <= open <= high` and `low <= close <= high`.
    pub fn is_within_range(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// Parameters of a `get_ohlc` request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OhlcQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub limit: usize,
    pub from_timestamp: Option<UnixSeconds>,
    pub to_timestamp: Option<UnixSeconds>,
}

impl OhlcQuery {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            limit: DEFAULT_OHLC_LIMIT,
            from_timestamp: None,
            to_timestamp: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_range(mut self, from: Option<UnixSeconds>, to: Option<UnixSeconds>) -> Self {
        self.from_timestamp = from;
        self.to_timestamp = to;
        self
    }

    /// Composite cache key over every parameter.
    pub fn cache_key(&self) -> String {
        fn bound(ts: Option<UnixSeconds>) -> String {
            ts.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
        }

        format!(
            "ohlc:{}:{}:{}:{}:{}",
            self.symbol,
            self.timeframe,
            self.limit,
            bound(self.from_timestamp),
            bound(self.to_timestamp)
        )
    }

    /// Whether `timestamp` falls inside the requested (inclusive) range.
    pub fn contains(&self, timestamp: UnixSeconds) -> bool {
        self.from_timestamp.map_or(true, |from| timestamp >= from)
            && self.to_timestamp.map_or(true, |to| timestamp <= to)
    }

    /// Keep the bars inside the requested range, then the most recent `limit`.
    ///
    /// Providers whose upstream cannot filter server side use this after
    /// decoding. Input is expected in ascending timestamp order.
    pub fn apply_window(&self, bars: Vec<OhlcBar>) -> Vec<OhlcBar> {
        let mut bars: Vec<OhlcBar> = bars
            .into_iter()
            .filter(|bar| self.contains(bar.timestamp))
            .collect();
        if bars.len() > self.limit {
            bars.drain(..bars.len() - self.limit);
        }
        bars
    }
}
