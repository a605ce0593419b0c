//! Opportunity Scanner
//!
//! Strategies that turn market data into ranked, confidence-scored trade
//! candidates:
//! - Endgame: near-certain outcomes shortly before resolution
//! - Cross-platform: price gaps against an external venue
//! - Intra-market: binary markets whose outcome prices sum below one

pub mod cross_platform;
pub mod endgame;
pub mod intra_market;
pub mod keywords;
pub mod scoring;
pub mod status;

pub use cross_platform::CrossPlatformStrategy;
pub use endgame::EndgameStrategy;
pub use intra_market::IntraMarketStrategy;
pub use status::StrategyStatus;

use async_trait::async_trait;
use polymarket_core::types::{Market, Opportunity, PriceQuote, TradeType};
use polymarket_core::{MarketDataProvider, Result};
use std::collections::HashMap;
use tracing::debug;

/// Common shape of every opportunity strategy.
#[async_trait]
pub trait OpportunityStrategy: Send + Sync {
    fn trade_type(&self) -> TradeType;

    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Scan for candidates, best first.
    ///
    /// Per-market failures are counted and skipped; an error means the scan
    /// as a whole could not run.
    async fn scan_opportunities(&self) -> Result<Vec<Opportunity>>;

    async fn status(&self) -> StrategyStatus;
}

/// Quotes for every token of `market` with liquidity on both sides.
pub(crate) async fn fetch_quotes(
    provider: &dyn MarketDataProvider,
    market: &Market,
) -> Result<HashMap<String, PriceQuote>> {
    let mut quotes = HashMap::with_capacity(market.tokens.len());
    for token in &market.tokens {
        match provider.get_order_book(&token.token_id).await? {
            Some(book) => {
                if let Some(quote) = PriceQuote::from_book(&token.outcome, &book) {
                    quotes.insert(token.token_id.clone(), quote);
                }
            }
            None => debug!(market_id = %market.id, token_id = %token.token_id, "No order book"),
        }
    }
    Ok(quotes)
}
