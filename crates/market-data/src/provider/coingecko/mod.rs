//! CoinGecko market data provider implementation.
//!
//! This module provides crypto market data from the CoinGecko API:
//! - Symbol list via /coins/markets (top 250 by market cap, quoted in USD)
//! - OHLC candles via /coins/{id}/ohlc
//! - Logos via /coins/{id}
//!
//! CoinGecko only serves OHLC for a fixed set of day windows and picks the
//! candle granularity from the window (30m up to 2 days, 4h up to 30 days,
//! 4 days beyond). The window is chosen so its candles divide the requested
//! timeframe evenly, and the candles are merged into timeframe buckets.
//! Timeframes finer than 30m are rejected. When the largest usable window
//! is shorter than `limit` bars, fewer bars are returned. The requested range
//! and limit are applied client side. Volume is not part of the OHLC
//! endpoint and is reported as 0.
//!
//! The free (demo) tier is limited to roughly 30 calls per minute.
//! API documentation: https://docs.coingecko.com/reference/introduction

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::http::{build_client, fetch_text, parse_json};
use crate::errors::ProviderError;
use crate::models::{OhlcBar, OhlcQuery, Symbol, UnixSeconds};
use crate::provider::DataProvider;
use crate::registry::{CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PROVIDER_ID: &str = "COINGECKO";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";
const QUOTE_ASSET: &str = "USD";
const MARKETS_PAGE_SIZE: &str = "250";

/// Day windows the /ohlc endpoint accepts, ascending.
const OHLC_DAY_WINDOWS: [i64; 7] = [1, 7, 14, 30, 90, 180, 365];

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

lazy_static! {
    /// Coin ids for major assets, usable before the symbol list was fetched.
    static ref MAJOR_COIN_IDS: HashMap<&'static str, &'static str> = HashMap::from([
        ("BTC", "bitcoin"),
        ("ETH", "ethereum"),
        ("USDT", "tether"),
        ("BNB", "binancecoin"),
        ("SOL", "solana"),
        ("XRP", "ripple"),
        ("USDC", "usd-coin"),
        ("ADA", "cardano"),
        ("DOGE", "dogecoin"),
        ("TRX", "tron"),
        ("AVAX", "avalanche-2"),
        ("DOT", "polkadot"),
        ("LINK", "chainlink"),
        ("MATIC", "matic-network"),
        ("LTC", "litecoin"),
        ("BCH", "bitcoin-cash"),
        ("ATOM", "cosmos"),
        ("XLM", "stellar"),
    ]);
}

// ============================================================================
// API Response Structures
// ============================================================================

/// Item of the /coins/markets response
#[derive(Debug, Deserialize)]
struct MarketCoin {
    /// CoinGecko coin id, e.g. "bitcoin"
    id: String,
    /// Ticker, lowercase, e.g. "btc"
    symbol: String,
    name: String,
    #[serde(default)]
    image: Option<String>,
}

/// Response from /coins/{id}, reduced to what we read
#[derive(Debug, Deserialize)]
struct CoinDetail {
    #[serde(default)]
    image: Option<CoinImage>,
}

#[derive(Debug, Deserialize)]
struct CoinImage {
    #[serde(default)]
    large: Option<String>,
}

/// Row of the /coins/{id}/ohlc response: `[time_ms, open, high, low, close]`
type OhlcRow = [f64; 5];

// ============================================================================
// CoinGeckoProvider
// ============================================================================

/// CoinGecko crypto market data provider.
pub struct CoinGeckoProvider {
    client: Client,
    api_key: Option<String>,
    /// Ticker -> coin id, learned from the markets listing
    coin_ids: RwLock<HashMap<String, String>>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl CoinGeckoProvider {
    /// Create a new CoinGecko provider. The demo API key is optional.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: build_client(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            coin_ids: RwLock::new(HashMap::new()),
            rate_limiter: RateLimiter::new(),
            circuit_breaker: CircuitBreaker::new(PROVIDER_ID),
        }
    }

    /// Replace the default circuit breaker settings.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = CircuitBreaker::with_config(PROVIDER_ID, config);
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", BASE_URL, path));
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Coin id for a symbol such as `BTCUSD`, `btc-usd` or `BTC`.
    fn coin_id(&self, symbol: &str) -> Option<String> {
        let base = base_asset(symbol);

        let learned = self
            .coin_ids
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("CoinGecko coin id map lock was poisoned, recovering");
                poisoned.into_inner()
            })
            .get(&base)
            .cloned();

        learned.or_else(|| MAJOR_COIN_IDS.get(base.as_str()).map(|id| id.to_string()))
    }

    /// Record ticker -> coin id mappings. The first (largest) coin wins a ticker.
    fn remember_coins(&self, coins: &[MarketCoin]) {
        let mut coin_ids = self.coin_ids.write().unwrap_or_else(|poisoned| {
            warn!("CoinGecko coin id map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        for coin in coins {
            coin_ids
                .entry(coin.symbol.to_uppercase())
                .or_insert_with(|| coin.id.clone());
        }
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketCoin>, ProviderError> {
        let request = self.get("/coins/markets").query(&[
            ("vs_currency", "usd"),
            ("order", "market_cap_desc"),
            ("per_page", MARKETS_PAGE_SIZE),
            ("page", "1"),
        ]);
        let body = fetch_text(PROVIDER_ID, request, "symbols").await?;
        parse_json(PROVIDER_ID, &body)
    }

    async fn fetch_ohlc(&self, query: &OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError> {
        let coin_id = self
            .coin_id(&query.symbol)
            .ok_or_else(|| ProviderError::symbol_not_found(PROVIDER_ID, &query.symbol))?;
        let days = ohlc_days(query, Utc::now().timestamp())?.to_string();

        debug!(
            "CoinGecko OHLC request: {} ({}) over {} days",
            query.symbol, coin_id, days
        );

        let request = self
            .get(&format!("/coins/{}/ohlc", urlencoding::encode(&coin_id)))
            .query(&[("vs_currency", "usd"), ("days", days.as_str())]);
        let body = fetch_text(PROVIDER_ID, request, &query.symbol).await?;
        let rows: Vec<OhlcRow> = parse_json(PROVIDER_ID, &body)?;

        let bars = resample(bars_from_rows(rows), query.timeframe.seconds());
        Ok(query.apply_window(bars))
    }

    async fn fetch_logo(&self, symbol: &str) -> Result<Option<String>, ProviderError> {
        let Some(coin_id) = self.coin_id(symbol) else {
            return Ok(None);
        };

        let request = self
            .get(&format!("/coins/{}", urlencoding::encode(&coin_id)))
            .query(&[
                ("localization", "false"),
                ("tickers", "false"),
                ("market_data", "false"),
                ("community_data", "false"),
                ("developer_data", "false"),
            ]);
        let body = fetch_text(PROVIDER_ID, request, symbol).await?;
        let detail: CoinDetail = parse_json(PROVIDER_ID, &body)?;

        Ok(detail.image.and_then(|image| image.large))
    }
}

// ============================================================================
// DataProvider Implementation
// ============================================================================

#[async_trait]
impl DataProvider for CoinGeckoProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(30, Duration::from_secs(60))
    }

    async fn get_symbols(&self) -> Result<Vec<Symbol>, ProviderError> {
        let coins = self.fetch_markets().await?;
        self.remember_coins(&coins);
        Ok(symbols_from_markets(coins))
    }

    async fn get_ohlc(&self, query: &OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError> {
        self.fetch_ohlc(query).await
    }

    async fn get_logo(&self, symbol: &str) -> Result<Option<String>, ProviderError> {
        self.fetch_logo(symbol).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Base ticker of a USD pair: `BTCUSD`, `BTC-USD`, `btc/usd` and `BTC` all give `BTC`.
fn base_asset(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let stripped = upper
        .strip_suffix(QUOTE_ASSET)
        .filter(|base| !base.is_empty())
        .unwrap_or(upper.as_str());
    stripped.trim_end_matches(['-', '/']).to_string()
}

/// Candle size CoinGecko returns for a `days` window.
fn candle_seconds(days: i64) -> i64 {
    match days {
        ..=2 => 30 * 60,
        3..=30 => 4 * 3600,
        _ => 4 * SECONDS_PER_DAY,
    }
}

/// Smallest day window covering the query among those whose candles divide
/// the timeframe, or the largest such window when none covers it.
fn ohlc_days(query: &OhlcQuery, now: UnixSeconds) -> Result<i64, ProviderError> {
    let timeframe = query.timeframe.seconds();
    let usable: Vec<i64> = OHLC_DAY_WINDOWS
        .iter()
        .copied()
        .filter(|days| timeframe % candle_seconds(*days) == 0)
        .collect();
    let Some(&largest) = usable.last() else {
        return Err(ProviderError::invalid_timeframe(
            PROVIDER_ID,
            query.timeframe.as_str(),
        ));
    };

    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
    let span = limit.saturating_mul(timeframe);
    let since_from = query
        .from_timestamp
        .map_or(0, |from| now.saturating_sub(from));
    let needed_seconds = span.max(since_from).max(1);
    let needed_days = needed_seconds.saturating_add(SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;

    Ok(usable
        .iter()
        .copied()
        .find(|days| *days >= needed_days)
        .unwrap_or(largest))
}

/// Merge ascending candles into buckets of `bucket_seconds`.
///
/// CoinGecko stamps a candle with its close time; buckets are labeled by
/// their start.
fn resample(bars: Vec<OhlcBar>, bucket_seconds: i64) -> Vec<OhlcBar> {
    let mut merged: Vec<OhlcBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        let start = bar.timestamp.saturating_sub(1).div_euclid(bucket_seconds) * bucket_seconds;
        match merged.last_mut() {
            Some(last) if last.timestamp == start => {
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.close = bar.close;
            }
            _ => merged.push(OhlcBar::new(start, bar.open, bar.high, bar.low, bar.close, 0.0)),
        }
    }
    merged
}

fn bars_from_rows(rows: Vec<OhlcRow>) -> Vec<OhlcBar> {
    rows.into_iter()
        .map(|[time_ms, open, high, low, close]| {
            OhlcBar::new((time_ms / 1000.0) as UnixSeconds, open, high, low, close, 0.0)
        })
        .collect()
}

fn symbols_from_markets(coins: Vec<MarketCoin>) -> Vec<Symbol> {
    coins
        .into_iter()
        .map(|coin| {
            let base = coin.symbol.to_uppercase();
            let symbol = Symbol::spot(
                format!("{}{}", base, QUOTE_ASSET),
                coin.name,
                base,
                QUOTE_ASSET,
                PROVIDER_ID,
            );
            match coin.image {
                Some(image) => symbol.with_logo(image),
                None => symbol,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderErrorCode;
    use crate::models::Timeframe;

    const MARKETS_JSON: &str = r#"[
        {
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "image": "https://assets.coingecko.com/coins/images/1/large/bitcoin.png",
            "current_price": 67000.0,
            "market_cap": 1320000000000
        },
        {
            "id": "pepe",
            "symbol": "pepe",
            "name": "Pepe",
            "image": null
        },
        {
            "id": "pepe-on-another-chain",
            "symbol": "pepe",
            "name": "Pepe (bridged)"
        }
    ]"#;

    #[test]
    fn test_provider_id_and_rate_limit() {
        let provider = CoinGeckoProvider::new(None);
        assert_eq!(provider.id(), "COINGECKO");
        assert_eq!(provider.rate_limit().max_requests, 30);
        assert_eq!(provider.circuit_breaker().provider(), "COINGECKO");
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let provider = CoinGeckoProvider::new(Some("  ".to_string()));
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn test_base_asset() {
        assert_eq!(base_asset("BTCUSD"), "BTC");
        assert_eq!(base_asset("btc-usd"), "BTC");
        assert_eq!(base_asset("ETH/USD"), "ETH");
        assert_eq!(base_asset("SOL"), "SOL");
        assert_eq!(base_asset("USDTUSD"), "USDT");
        assert_eq!(base_asset("USD"), "USD");
    }

    #[test]
    fn test_markets_parsing() {
        let coins: Vec<MarketCoin> = parse_json(PROVIDER_ID, MARKETS_JSON).unwrap();
        let symbols = symbols_from_markets(coins);

        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[0].symbol, "BTCUSD");
        assert_eq!(symbols[0].base_asset, "BTC");
        assert_eq!(symbols[0].quote_asset, "USD");
        assert_eq!(symbols[0].exchange, "COINGECKO");
        assert!(symbols[0].logo_url.is_some());
        assert!(symbols[1].logo_url.is_none());
    }

    #[test]
    fn test_coin_id_resolution() {
        let provider = CoinGeckoProvider::new(None);
        assert_eq!(provider.coin_id("BTCUSD").as_deref(), Some("bitcoin"));
        assert!(provider.coin_id("PEPEUSD").is_none());

        let coins: Vec<MarketCoin> = parse_json(PROVIDER_ID, MARKETS_JSON).unwrap();
        provider.remember_coins(&coins);

        // The higher-ranked coin keeps the ticker.
        assert_eq!(provider.coin_id("PEPEUSD").as_deref(), Some("pepe"));
    }

    #[test]
    fn test_ohlc_rows_parsing() {
        let json = r#"[
            [1704067200000, 42000.5, 42500.0, 41800.0, 42300.25],
            [1704069000000, 42300.25, 42400.0, 42100.0, 42150.0]
        ]"#;

        let rows: Vec<OhlcRow> = parse_json(PROVIDER_ID, json).unwrap();
        let bars = bars_from_rows(rows);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 1_704_067_200);
        assert_eq!(bars[0].open, 42000.5);
        assert_eq!(bars[1].close, 42150.0);
        assert_eq!(bars[1].volume, 0.0);
    }

    #[test]
    fn test_ohlc_days_covers_limit_and_range() {
        let now = 1_704_067_200;

        let query = OhlcQuery::new("BTCUSD", Timeframe::OneHour).with_limit(24);
        assert_eq!(ohlc_days(&query, now).unwrap(), 1);

        let query = OhlcQuery::new("BTCUSD", Timeframe::FourHours).with_limit(100);
        assert_eq!(ohlc_days(&query, now).unwrap(), 30);

        let query = OhlcQuery::new("BTCUSD", Timeframe::FourHours)
            .with_limit(10)
            .with_range(Some(now - 10 * SECONDS_PER_DAY), None);
        assert_eq!(ohlc_days(&query, now).unwrap(), 14);
    }

    #[test]
    fn test_ohlc_days_never_picks_coarser_candles_than_timeframe() {
        let now = 1_704_067_200;

        // 1h bars need 30m candles, only served for the 1-day window.
        let query = OhlcQuery::new("BTCUSD", Timeframe::OneHour).with_limit(500);
        assert_eq!(ohlc_days(&query, now).unwrap(), 1);

        // Beyond 30 days CoinGecko returns 4-day candles.
        let query = OhlcQuery::new("BTCUSD", Timeframe::OneDay).with_limit(100);
        assert_eq!(ohlc_days(&query, now).unwrap(), 30);

        let query = OhlcQuery::new("BTCUSD", Timeframe::OneWeek).with_limit(500);
        assert_eq!(ohlc_days(&query, now).unwrap(), 30);
    }

    #[test]
    fn test_ohlc_days_rejects_sub_candle_timeframes() {
        let query = OhlcQuery::new("BTCUSD", Timeframe::FiveMinutes);
        let err = ohlc_days(&query, 1_704_067_200).unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidTimeframe);
        assert_eq!(err.provider, PROVIDER_ID);
    }

    #[test]
    fn test_ohlc_days_with_extreme_from_does_not_overflow() {
        let query = OhlcQuery::new("BTCUSD", Timeframe::FourHours)
            .with_limit(usize::MAX)
            .with_range(Some(i64::MIN), None);
        assert_eq!(ohlc_days(&query, 1_704_067_200).unwrap(), 30);
    }

    #[test]
    fn test_resample_merges_candles_into_buckets() {
        let hour = 3600;
        // 4h candles stamped with their close time.
        let candles = vec![
            OhlcBar::new(4 * hour, 10.0, 12.0, 9.0, 11.0, 0.0),
            OhlcBar::new(8 * hour, 11.0, 15.0, 10.0, 14.0, 0.0),
            OhlcBar::new(24 * hour, 14.0, 16.0, 8.0, 9.0, 0.0),
            OhlcBar::new(28 * hour, 9.0, 10.0, 7.0, 8.0, 0.0),
        ];

        let daily = resample(candles, 24 * hour);

        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0], OhlcBar::new(0, 10.0, 16.0, 8.0, 9.0, 0.0));
        assert_eq!(daily[1], OhlcBar::new(24 * hour, 9.0, 10.0, 7.0, 8.0, 0.0));
    }

    #[test]
    fn test_coin_detail_parsing() {
        let json = r#"{
            "id": "bitcoin",
            "image": {
                "thumb": "https://assets.coingecko.com/coins/images/1/thumb/bitcoin.png",
                "large": "https://assets.coingecko.com/coins/images/1/large/bitcoin.png"
            }
        }"#;

        let detail: CoinDetail = parse_json(PROVIDER_ID, json).unwrap();
        assert_eq!(
            detail.image.and_then(|i| i.large).as_deref(),
            Some("https://assets.coingecko.com/coins/images/1/large/bitcoin.png")
        );

        let detail: CoinDetail = parse_json(PROVIDER_ID, r#"{"id": "x"}"#).unwrap();
        assert!(detail.image.is_none());
    }

    #[tokio::test]
    async fn test_unknown_coin_has_no_logo() {
        let provider = CoinGeckoProvider::new(None);
        assert_eq!(provider.get_logo("AAPL").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_coin_ohlc_is_symbol_not_found() {
        let provider = CoinGeckoProvider::new(None);
        let err = provider
            .get_ohlc(&OhlcQuery::new("NOTACOINUSD", Timeframe::OneHour))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ProviderErrorCode::SymbolNotFound);
    }
}
