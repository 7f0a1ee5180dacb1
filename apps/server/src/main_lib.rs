use std::sync::Arc;

use lokifi_market_data::{CoinGeckoProvider, FmpProvider, ProviderManager};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LogFormat, ProviderKind};

pub struct AppState {
    pub manager: Arc<ProviderManager>,
}

impl AppState {
    pub fn new(manager: ProviderManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init(),
    }
}

/// Construct the providers in configured priority order.
pub fn build_provider_manager(config: &Config) -> ProviderManager {
    let mut manager = ProviderManager::with_config(config.manager.clone());

    for kind in &config.providers {
        match kind {
            ProviderKind::CoinGecko => {
                let provider = CoinGeckoProvider::new(config.coingecko_api_key.clone())
                    .with_circuit_breaker(config.breaker.clone());
                manager.add_provider(Arc::new(provider));
            }
            ProviderKind::Fmp => match &config.fmp_api_key {
                Some(key) => {
                    let provider = FmpProvider::new(key.clone())
                        .with_circuit_breaker(config.breaker.clone());
                    manager.add_provider(Arc::new(provider));
                }
                None => tracing::warn!("LOKIFI_FMP_API_KEY is not set, skipping FMP provider"),
            },
        }
    }

    let order: Vec<&str> = manager.providers().iter().map(|p| p.id()).collect();
    if order.is_empty() {
        tracing::warn!("No market data providers configured; requests will fail");
    } else {
        tracing::info!("Market data providers in priority order: {}", order.join(", "));
    }
    manager
}

pub fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let manager = build_provider_manager(config);
    Ok(Arc::new(AppState::new(manager)))
}
