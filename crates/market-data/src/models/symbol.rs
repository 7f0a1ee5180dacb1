use serde::{Deserialize, Serialize};

/// Kind of market a symbol trades on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    #[default]
    Spot,
}

/// A tradable instrument listed by a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    /// Canonical ticker, e.g. `BTCUSD` or `AAPL`
    pub symbol: String,

    /// Display name
    pub name: String,

    pub base_asset: String,

    pub quote_asset: String,

    /// Exchange or venue reported by the provider
    pub exchange: String,

    #[serde(rename = "type", default)]
    pub symbol_type: SymbolType,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Symbol {
    /// Create an active spot symbol without a logo.
    pub fn spot(
        symbol: impl Into<String>,
        name: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            exchange: exchange.into(),
            symbol_type: SymbolType::Spot,
            active: true,
            logo_url: None,
        }
    }

    pub fn with_logo(mut self, logo_url: impl Into<String>) -> Self {
        self.logo_url = Some(logo_url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_defaults() {
        let symbol = Symbol::spot("BTCUSD", "Bitcoin", "BTC", "USD", "COINGECKO");
        assert_eq!(symbol.symbol_type, SymbolType::Spot);
        assert!(symbol.active);
        assert!(symbol.logo_url.is_none());
    }

    #[test]
    fn test_serializes_type_field() {
        let symbol = Symbol::spot("AAPL", "Apple Inc", "AAPL", "USD", "NASDAQ")
            .with_logo("https://example.com/aapl.png");
        let json = serde_json::to_value(&symbol).unwrap();

        assert_eq!(json["type"], "spot");
        assert_eq!(json["baseAsset"], "AAPL");
        assert_eq!(json["logoUrl"], "https://example.com/aapl.png");
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let json = r#"{
            "symbol": "ETHUSD",
            "name": "Ethereum",
            "baseAsset": "ETH",
            "quoteAsset": "USD",
            "exchange": "COINGECKO"
        }"#;

        let symbol: Symbol = serde_json::from_str(json).unwrap();
        assert_eq!(symbol.symbol_type, SymbolType::Spot);
        assert!(symbol.active);
    }
}
