use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use lokifi_market_data::{OhlcBar, OhlcQuery, ProviderStatus, Symbol, Timeframe, UnixSeconds};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

const MAX_OHLC_LIMIT: usize = 5000;
const DEFAULT_OHLC_LIMIT: usize = 500;

#[derive(Deserialize)]
struct OhlcParams {
    timeframe: Option<String>,
    limit: Option<usize>,
    from: Option<UnixSeconds>,
    to: Option<UnixSeconds>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoResponse {
    symbol: String,
    logo_url: Option<String>,
}

fn normalize_symbol(raw: &str) -> ApiResult<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::BadRequest("Symbol must not be empty".to_string()));
    }
    Ok(symbol)
}

fn ohlc_query(symbol: String, params: OhlcParams) -> ApiResult<OhlcQuery> {
    let timeframe = match params.timeframe.as_deref() {
        Some(raw) => raw.parse::<Timeframe>()?,
        None => Timeframe::OneHour,
    };
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(ApiError::BadRequest(format!(
                "`from` ({}) is after `to` ({})",
                from, to
            )));
        }
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_OHLC_LIMIT)
        .clamp(1, MAX_OHLC_LIMIT);

    Ok(OhlcQuery::new(symbol, timeframe)
        .with_limit(limit)
        .with_range(params.from, params.to))
}

async fn list_symbols(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Symbol>>> {
    let symbols = state.manager.get_symbols().await?;
    Ok(Json(symbols))
}

async fn get_ohlc(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<OhlcParams>,
) -> ApiResult<Json<Vec<OhlcBar>>> {
    let query = ohlc_query(normalize_symbol(&symbol)?, params)?;
    let bars = state.manager.get_ohlc(query).await?;
    Ok(Json(bars))
}

async fn get_logo(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<LogoResponse>> {
    let symbol = normalize_symbol(&symbol)?;
    let logo_url = state.manager.get_logo(&symbol).await?;
    Ok(Json(LogoResponse { symbol, logo_url }))
}

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderStatus>> {
    Json(state.manager.provider_statuses())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/market/symbols", get(list_symbols))
        .route("/market/ohlc/{symbol}", get(get_ohlc))
        .route("/market/logo/{symbol}", get(get_logo))
        .route("/market/providers", get(list_providers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<usize>) -> OhlcParams {
        OhlcParams {
            timeframe: None,
            limit,
            from: None,
            to: None,
        }
    }

    #[test]
    fn test_limit_is_clamped() {
        let query = ohlc_query("BTC".to_string(), params(Some(0))).unwrap();
        assert_eq!(query.limit, 1);
        let query = ohlc_query("BTC".to_string(), params(Some(100_000))).unwrap();
        assert_eq!(query.limit, MAX_OHLC_LIMIT);
        let query = ohlc_query("BTC".to_string(), params(None)).unwrap();
        assert_eq!(query.limit, DEFAULT_OHLC_LIMIT);
        assert_eq!(query.timeframe, Timeframe::OneHour);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let inverted = OhlcParams {
            from: Some(200),
            to: Some(100),
            ..params(None)
        };
        assert!(matches!(
            ohlc_query("BTC".to_string(), inverted),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_symbol_is_normalized() {
        assert_eq!(normalize_symbol(" btcusd ").unwrap(), "BTCUSD");
        assert!(normalize_symbol("  ").is_err());
    }
}
