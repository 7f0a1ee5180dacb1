use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use lokifi_market_data::{CircuitBreakerConfig, ManagerConfig};

/// Output format of the tracing subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("text") {
            Ok(Self::Text)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(anyhow!("expected `text` or `json`, got `{}`", s))
        }
    }
}

/// Upstream data providers the server knows how to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    CoinGecko,
    Fmp,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coingecko" => Ok(Self::CoinGecko),
            "fmp" => Ok(Self::Fmp),
            other => Err(anyhow!("unknown provider `{}`", other)),
        }
    }
}

pub struct Config {
    pub listen_addr: SocketAddr,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
    /// Failover order, highest priority first.
    pub providers: Vec<ProviderKind>,
    pub coingecko_api_key: Option<String>,
    pub fmp_api_key: Option<String>,
    pub manager: ManagerConfig,
    pub breaker: CircuitBreakerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_allow: vec!["*".to_string()],
            request_timeout: Duration::from_millis(30_000),
            log_format: LogFormat::Text,
            providers: vec![ProviderKind::CoinGecko, ProviderKind::Fmp],
            coingecko_api_key: None,
            fmp_api_key: None,
            manager: ManagerConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl Config {
    /// Read `LOKIFI_*` variables, loading `.env` first when present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset variables keep
    /// their defaults; set but unparsable ones are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string());

        let listen_addr = parse_or(&var, "LOKIFI_LISTEN_ADDR", defaults.listen_addr)?;
        let cors_allow = match var("LOKIFI_CORS_ALLOW_ORIGINS") {
            Some(raw) => split_list(&raw),
            None => defaults.cors_allow,
        };
        let timeout_ms = parse_or(&var, "LOKIFI_REQUEST_TIMEOUT_MS", 30_000u64)?;
        let log_format = parse_or(&var, "LOKIFI_LOG_FORMAT", defaults.log_format)?;

        let providers = match var("LOKIFI_PROVIDERS") {
            Some(raw) => parse_providers(&raw).context("Invalid LOKIFI_PROVIDERS")?,
            None => defaults.providers,
        };

        let manager = ManagerConfig {
            symbols_ttl: secs_or(&var, "LOKIFI_SYMBOLS_TTL_SECS", defaults.manager.symbols_ttl)?,
            ohlc_ttl: secs_or(&var, "LOKIFI_OHLC_TTL_SECS", defaults.manager.ohlc_ttl)?,
            logo_ttl: secs_or(&var, "LOKIFI_LOGO_TTL_SECS", defaults.manager.logo_ttl)?,
            ..defaults.manager
        };
        let breaker = CircuitBreakerConfig {
            failure_threshold: parse_or(
                &var,
                "LOKIFI_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker.failure_threshold,
            )?,
            recovery_timeout: secs_or(
                &var,
                "LOKIFI_BREAKER_RECOVERY_TIMEOUT_SECS",
                defaults.breaker.recovery_timeout,
            )?,
        };
        if breaker.failure_threshold == 0 {
            return Err(anyhow!("LOKIFI_BREAKER_FAILURE_THRESHOLD must be at least 1"));
        }

        Ok(Self {
            listen_addr,
            cors_allow,
            request_timeout: Duration::from_millis(timeout_ms),
            log_format,
            providers,
            coingecko_api_key: var("LOKIFI_COINGECKO_API_KEY").filter(|k| !k.is_empty()),
            fmp_api_key: var("LOKIFI_FMP_API_KEY").filter(|k| !k.is_empty()),
            manager,
            breaker,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| anyhow!("Invalid {}=`{}`: {}", name, raw, e)),
        _ => Ok(default),
    }
}

fn secs_or<F>(var: &F, name: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, name, default.as_secs()).map(Duration::from_secs)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an ordered provider list. Repeats keep their first position.
fn parse_providers(raw: &str) -> anyhow::Result<Vec<ProviderKind>> {
    let mut providers = Vec::new();
    for name in split_list(raw) {
        let kind: ProviderKind = name.parse()?;
        if !providers.contains(&kind) {
            providers.push(kind);
        }
    }
    Ok(providers)
}
