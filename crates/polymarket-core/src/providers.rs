//! Capability contracts for market data, order execution and external venues.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::types::{Market, OrderBook, OrderRequest, OrderStatusReport, PriceQuote, TokenBalance};
use crate::Result;

/// Connectivity report from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub connected: bool,
    pub detail: Option<String>,
}

impl HealthStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            detail: None,
        }
    }

    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self {
            connected: false,
            detail: Some(detail.into()),
        }
    }
}

/// Read-only market data source. Implementations are rate limited and
/// eventually consistent.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn list_markets(&self, active: bool, limit: usize, offset: usize) -> Result<Vec<Market>>;

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>>;

    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>>;

    /// Top-of-book quotes keyed by token id.
    ///
    /// Tokens without liquidity on both sides are left out.
    async fn get_prices(&self, market_id: &str) -> Result<HashMap<String, PriceQuote>> {
        let Some(market) = self.get_market(market_id).await? else {
            return Ok(HashMap::new());
        };

        let mut quotes = HashMap::with_capacity(market.tokens.len());
        for token in &market.tokens {
            match self.get_order_book(&token.token_id).await? {
                Some(book) => {
                    if let Some(quote) = PriceQuote::from_book(&token.outcome, &book) {
                        quotes.insert(token.token_id.clone(), quote);
                    }
                }
                None => debug!(token_id = %token.token_id, "No order book for token"),
            }
        }
        Ok(quotes)
    }

    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Order placement and wallet access.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Returns the exchange order id, or `None` when the order was not accepted.
    async fn place_order(&self, order: &OrderRequest) -> Result<Option<String>>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn get_order_status(&self, order_id: &str) -> Result<Option<OrderStatusReport>>;

    async fn get_balances(&self) -> Result<Vec<TokenBalance>>;

    /// Collateral available to trade, in USD.
    async fn get_cash_balance(&self) -> Result<Decimal>;

    /// Convert a settled token position into collateral at `payout` per share.
    ///
    /// Returns the collateral credited. Venues that settle on their own
    /// credit nothing here.
    async fn redeem(&self, _token_id: &str, _payout: Decimal) -> Result<Decimal> {
        Ok(Decimal::ZERO)
    }

    async fn health_check(&self) -> Result<HealthStatus>;
}

/// A market listed on another venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMarket {
    pub id: String,
    pub question: String,
    /// Price per outcome name.
    pub prices: HashMap<String, Decimal>,
    pub volume_24h: Decimal,
    #[serde(default)]
    pub category: Option<String>,
}

impl ExternalMarket {
    /// Price for an outcome name, ignoring case.
    pub fn price_for(&self, outcome: &str) -> Option<Decimal> {
        self.prices
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(outcome))
            .map(|(_, price)| *price)
    }
}

/// Market listings from a second venue for cross-platform comparison.
#[async_trait]
pub trait ExternalMarketProvider: Send + Sync {
    fn venue(&self) -> &str;

    async fn list_markets(&self) -> Result<Vec<ExternalMarket>>;
}

/// External venue backed by a fixed list of markets.
pub struct StaticExternalMarkets {
    venue: String,
    markets: Vec<ExternalMarket>,
}

impl StaticExternalMarkets {
    pub fn new(venue: impl Into<String>, markets: Vec<ExternalMarket>) -> Self {
        Self {
            venue: venue.into(),
            markets,
        }
    }

    /// Load the list from a JSON array on disk.
    pub fn from_json_file(venue: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let markets: Vec<ExternalMarket> = serde_json::from_str(&raw)?;
        Ok(Self::new(venue, markets))
    }
}

#[async_trait]
impl ExternalMarketProvider for StaticExternalMarkets {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn list_markets(&self) -> Result<Vec<ExternalMarket>> {
        Ok(self.markets.clone())
    }
}
