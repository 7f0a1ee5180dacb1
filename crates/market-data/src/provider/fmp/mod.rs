//! Financial Modeling Prep (FMP) market data provider implementation.
//!
//! This module provides equity market data from the FMP API:
//! - Symbol list via /api/v3/stock/list (stocks only)
//! - Intraday candles via /api/v3/historical-chart/{interval}/{symbol}
//! - Daily candles via /api/v3/historical-price-full/{symbol}
//! - Logos via the public image-stock CDN (no request needed)
//!
//! FMP answers some failures with HTTP 200 and an `"Error Message"` body,
//! so every body is checked for one before decoding.
//!
//! API documentation: https://site.financialmodelingprep.com/developer/docs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::http::{build_client, fetch_text, parse_json};
use crate::errors::{ProviderError, ProviderErrorCode};
use crate::models::{OhlcBar, OhlcQuery, Symbol, Timeframe, UnixSeconds};
use crate::provider::DataProvider;
use crate::registry::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};

const BASE_URL: &str = "https://financialmodelingprep.com/api/v3";
const LOGO_BASE_URL: &str = "https://financialmodelingprep.com/image-stock";
const PROVIDER_ID: &str = "FMP";
const QUOTE_ASSET: &str = "USD";

// ============================================================================
// API Response Structures
// ============================================================================

/// Item of the /stock/list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedStock {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    exchange_short_name: Option<String>,
    /// "stock", "etf", "trust", ...
    #[serde(rename = "type", default)]
    security_type: Option<String>,
}

/// Candle shared by the intraday and daily endpoints
#[derive(Debug, Deserialize)]
struct Candle {
    /// "2024-01-05 15:59:00" (intraday) or "2024-01-05" (daily)
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Response from /historical-price-full/{symbol}
#[derive(Debug, Deserialize)]
struct DailyHistory {
    /// Absent when the symbol is unknown (FMP answers `{}`)
    #[serde(default)]
    historical: Option<Vec<Candle>>,
}

/// Error body FMP sends instead of data
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

// ============================================================================
// FmpProvider
// ============================================================================

/// Financial Modeling Prep equity data provider. Requires an API key.
pub struct FmpProvider {
    client: Client,
    api_key: String,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl FmpProvider {
    /// Create a new FMP provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
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
        self.client
            .get(format!("{}{}", BASE_URL, path))
            .query(&[("apikey", self.api_key.as_str())])
    }

    /// GET `path` and return the body once it is known not to be an error.
    async fn fetch(&self, request: RequestBuilder, subject: &str) -> Result<String, ProviderError> {
        let body = fetch_text(PROVIDER_ID, request, subject).await?;
        check_api_error(&body)?;
        Ok(body)
    }

    async fn fetch_ohlc(&self, query: &OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError> {
        let symbol = query.symbol.trim().to_uppercase();
        let encoded = urlencoding::encode(&symbol);

        let path = match intraday_interval(query.timeframe) {
            Some(interval) => format!("/historical-chart/{}/{}", interval, encoded),
            None if query.timeframe == Timeframe::OneDay => {
                format!("/historical-price-full/{}", encoded)
            }
            None => {
                return Err(ProviderError::invalid_timeframe(
                    PROVIDER_ID,
                    query.timeframe.as_str(),
                ))
            }
        };

        let mut request = self.get(&path);
        for (name, bound) in [("from", query.from_timestamp), ("to", query.to_timestamp)] {
            if let Some(date) = bound.and_then(format_date) {
                request = request.query(&[(name, date)]);
            }
        }

        debug!("FMP OHLC request: {} {}", symbol, query.timeframe);
        let body = self.fetch(request, &symbol).await?;

        let candles = if query.timeframe == Timeframe::OneDay {
            let history: DailyHistory = parse_json(PROVIDER_ID, &body)?;
            history
                .historical
                .ok_or_else(|| ProviderError::symbol_not_found(PROVIDER_ID, &symbol))?
        } else {
            parse_json::<Vec<Candle>>(PROVIDER_ID, &body)?
        };

        Ok(query.apply_window(bars_from_candles(candles)))
    }
}

// ============================================================================
// DataProvider Implementation
// ============================================================================

#[async_trait]
impl DataProvider for FmpProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    async fn get_symbols(&self) -> Result<Vec<Symbol>, ProviderError> {
        let body = self.fetch(self.get("/stock/list"), "symbols").await?;
        let stocks: Vec<ListedStock> = parse_json(PROVIDER_ID, &body)?;
        Ok(symbols_from_list(stocks))
    }

    async fn get_ohlc(&self, query: &OhlcQuery) -> Result<Vec<OhlcBar>, ProviderError> {
        self.fetch_ohlc(query).await
    }

    async fn get_logo(&self, symbol: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some(logo_url(symbol)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Path segment for intraday timeframes; `None` for daily and weekly.
fn intraday_interval(timeframe: Timeframe) -> Option<&'static str> {
    match timeframe {
        Timeframe::OneMinute => Some("1min"),
        Timeframe::FiveMinutes => Some("5min"),
        Timeframe::FifteenMinutes => Some("15min"),
        Timeframe::ThirtyMinutes => Some("30min"),
        Timeframe::OneHour => Some("1hour"),
        Timeframe::FourHours => Some("4hour"),
        Timeframe::OneDay | Timeframe::OneWeek => None,
    }
}

fn logo_url(symbol: &str) -> String {
    format!(
        "{}/{}.png",
        LOGO_BASE_URL,
        urlencoding::encode(&symbol.trim().to_uppercase())
    )
}

/// Map an `"Error Message"` body onto an error code.
fn check_api_error(body: &str) -> Result<(), ProviderError> {
    if !body.trim_start().starts_with('{') {
        return Ok(());
    }
    let Ok(ApiErrorBody {
        error_message: Some(message),
    }) = serde_json::from_str::<ApiErrorBody>(body)
    else {
        return Ok(());
    };

    let code = if message.contains("Limit Reach") {
        ProviderErrorCode::QuotaExceeded
    } else if message.contains("Invalid API KEY") || message.contains("apikey") {
        ProviderErrorCode::AuthenticationError
    } else {
        ProviderErrorCode::InternalError
    };
    Err(ProviderError::new(code, PROVIDER_ID, message))
}

/// `YYYY-MM-DD` for a unix timestamp.
fn format_date(timestamp: UnixSeconds) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Parse FMP's `date` field, intraday or daily.
///
/// FMP reports exchange-local wall time without an offset; it is taken as UTC.
fn parse_candle_date(date: &str) -> Option<UnixSeconds> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Convert newest-first candles into ascending bars.
fn bars_from_candles(candles: Vec<Candle>) -> Vec<OhlcBar> {
    let mut bars: Vec<OhlcBar> = candles
        .into_iter()
        .filter_map(|candle| match parse_candle_date(&candle.date) {
            Some(timestamp) => Some(OhlcBar::new(
                timestamp,
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.volume,
            )),
            None => {
                debug!("Skipping FMP candle with unparseable date '{}'", candle.date);
                None
            }
        })
        .collect();
    bars.sort_by_key(|bar| bar.timestamp);
    bars
}

fn symbols_from_list(stocks: Vec<ListedStock>) -> Vec<Symbol> {
    stocks
        .into_iter()
        .filter(|stock| stock.security_type.as_deref() == Some("stock"))
        .map(|stock| {
            let name = stock.name.unwrap_or_else(|| stock.symbol.clone());
            let exchange = stock
                .exchange_short_name
                .unwrap_or_else(|| PROVIDER_ID.to_string());
            let logo = logo_url(&stock.symbol);
            Symbol::spot(
                stock.symbol.clone(),
                name,
                stock.symbol,
                QUOTE_ASSET,
                exchange,
            )
            .with_logo(logo)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id() {
        let provider = FmpProvider::new("test_key".to_string());
        assert_eq!(provider.id(), "FMP");
        assert_eq!(provider.rate_limit().max_requests, 100);
    }

    #[test]
    fn test_intraday_interval() {
        assert_eq!(intraday_interval(Timeframe::OneMinute), Some("1min"));
        assert_eq!(intraday_interval(Timeframe::FourHours), Some("4hour"));
        assert_eq!(intraday_interval(Timeframe::OneDay), None);
    }

    #[tokio::test]
    async fn test_weekly_is_invalid_timeframe() {
        let provider = FmpProvider::new("test_key".to_string());
        let err = provider
            .get_ohlc(&OhlcQuery::new("AAPL", Timeframe::OneWeek))
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidTimeframe);
        assert_eq!(err.provider, "FMP");
    }

    #[tokio::test]
    async fn test_logo_url() {
        let provider = FmpProvider::new("test_key".to_string());
        assert_eq!(
            provider.get_logo("aapl").await.unwrap().as_deref(),
            Some("https://financialmodelingprep.com/image-stock/AAPL.png")
        );
        assert_eq!(
            logo_url("BRK.B"),
            "https://financialmodelingprep.com/image-stock/BRK.B.png"
        );
    }

    #[test]
    fn test_stock_list_parsing_keeps_stocks() {
        let json = r#"[
            {"symbol": "AAPL", "name": "Apple Inc.", "price": 185.64, "exchange": "NASDAQ Global Select", "exchangeShortName": "NASDAQ", "type": "stock"},
            {"symbol": "SPY", "name": "SPDR S&P 500 ETF Trust", "price": 470.0, "exchange": "New York Stock Exchange Arca", "exchangeShortName": "AMEX", "type": "etf"},
            {"symbol": "XYZ", "name": null, "exchangeShortName": null, "type": "stock"}
        ]"#;

        let stocks: Vec<ListedStock> = parse_json(PROVIDER_ID, json).unwrap();
        let symbols = symbols_from_list(stocks);

        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].symbol, "AAPL");
        assert_eq!(symbols[0].exchange, "NASDAQ");
        assert_eq!(symbols[0].quote_asset, "USD");
        assert_eq!(symbols[1].name, "XYZ");
        assert_eq!(symbols[1].exchange, "FMP");
    }

    #[test]
    fn test_intraday_candles_are_sorted_ascending() {
        let json = r#"[
            {"date": "2024-01-05 15:59:00", "open": 181.99, "low": 181.9, "high": 182.06, "close": 181.93, "volume": 1204455},
            {"date": "2024-01-05 15:58:00", "open": 182.03, "low": 181.96, "high": 182.08, "close": 181.99, "volume": 328201}
        ]"#;

        let candles: Vec<Candle> = parse_json(PROVIDER_ID, json).unwrap();
        let bars = bars_from_candles(candles);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].timestamp - bars[0].timestamp, 60);
        assert_eq!(bars[0].open, 182.03);
        assert_eq!(bars[1].volume, 1_204_455.0);
    }

    #[test]
    fn test_daily_history_parsing() {
        let json = r#"{
            "symbol": "AAPL",
            "historical": [
                {"date": "2024-01-05", "open": 181.99, "high": 182.76, "low": 180.17, "close": 181.18, "adjClose": 181.18, "volume": 62303300},
                {"date": "2024-01-04", "open": 182.15, "high": 183.09, "low": 180.88, "close": 181.91, "adjClose": 181.91, "volume": 71983600}
            ]
        }"#;

        let history: DailyHistory = parse_json(PROVIDER_ID, json).unwrap();
        let bars = bars_from_candles(history.historical.unwrap());

        assert_eq!(bars[0].timestamp, 1_704_326_400);
        assert_eq!(bars[1].timestamp, 1_704_412_800);
    }

    #[test]
    fn test_unknown_symbol_daily_history_is_empty_object() {
        let history: DailyHistory = parse_json(PROVIDER_ID, "{}").unwrap();
        assert!(history.historical.is_none());
    }

    #[test]
    fn test_unparseable_dates_are_skipped() {
        let candles = vec![Candle {
            date: "yesterday".to_string(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        }];
        assert!(bars_from_candles(candles).is_empty());
    }

    #[test]
    fn test_api_error_messages() {
        let limit = r#"{"Error Message": "Limit Reach . Please upgrade your plan or visit our documentation for more details"}"#;
        assert_eq!(
            check_api_error(limit).unwrap_err().code,
            ProviderErrorCode::QuotaExceeded
        );

        let invalid_key = r#"{"Error Message": "Invalid API KEY. Please retry or visit our documentation to create one FREE"}"#;
        assert_eq!(
            check_api_error(invalid_key).unwrap_err().code,
            ProviderErrorCode::AuthenticationError
        );

        assert!(check_api_error(r#"[{"symbol": "AAPL"}]"#).is_ok());
        assert!(check_api_error(r#"{"symbol": "AAPL", "historical": []}"#).is_ok());
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(1_704_412_800).as_deref(), Some("2024-01-05"));
    }
}
