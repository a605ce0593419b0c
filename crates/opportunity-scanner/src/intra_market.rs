//! Intra-market arbitrage: binary markets whose two outcomes together cost
//! less than the one dollar they are guaranteed to pay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polymarket_core::config::IntraMarketConfig;
use polymarket_core::types::{
    Market, Opportunity, OpportunityDetails, OpportunityLeg, OrderSide, PriceQuote, TradeType,
};
use polymarket_core::{MarketDataProvider, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::scoring::{cap_confidence, points_at_least};
use crate::status::ScanStats;
use crate::{fetch_quotes, OpportunityStrategy, StrategyStatus};

pub struct IntraMarketStrategy {
    config: RwLock<IntraMarketConfig>,
    enabled: AtomicBool,
    market_data: Arc<dyn MarketDataProvider>,
    stats: RwLock<ScanStats>,
}

impl IntraMarketStrategy {
    pub fn new(config: IntraMarketConfig, market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config: RwLock::new(config),
            market_data,
            stats: RwLock::new(ScanStats::default()),
        }
    }

    pub async fn config(&self) -> IntraMarketConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: IntraMarketConfig) {
        self.enabled.store(config.enabled, Ordering::SeqCst);
        *self.config.write().await = config;
        info!("Intra-market strategy configuration updated");
    }
}

/// Basket candidate for a binary market.
///
/// `Ok(None)` unless both outcomes are quoted and their mid-prices sum to at
/// most the ceiling with at least the minimum margin below one dollar.
pub fn evaluate_market(
    config: &IntraMarketConfig,
    market: &Market,
    quotes: &HashMap<String, PriceQuote>,
    now: DateTime<Utc>,
) -> Result<Option<Opportunity>> {
    if !market.is_binary() {
        return Ok(None);
    }
    let legs: Vec<&PriceQuote> = market
        .tokens
        .iter()
        .filter_map(|t| quotes.get(&t.token_id))
        .collect();
    let [first, second] = legs.as_slice() else {
        return Ok(None);
    };

    let price_sum = first.mid_price + second.mid_price;
    if price_sum <= Decimal::ZERO || price_sum > config.max_price_sum {
        return Ok(None);
    }
    let margin = Decimal::ONE - price_sum;
    if margin < config.min_profit_margin {
        return Ok(None);
    }

    let expected_return_pct = margin / price_sum * Decimal::ONE_HUNDRED;
    let confidence_score = cap_confidence(
        config.base_confidence
            + points_at_least(&config.margin_tiers, margin)
            + points_at_least(&config.volume_tiers, market.volume_24h),
    );
    let suggested_size =
        (config.base_size * confidence_score / Decimal::new(50, 0)).min(config.max_position_size);

    Ok(Some(Opportunity {
        trade_type: TradeType::IntraMarket,
        market_id: market.id.clone(),
        question: market.question.clone(),
        legs: [first, second]
            .iter()
            .map(|quote| OpportunityLeg {
                token_id: quote.token_id.clone(),
                outcome: quote.outcome.clone(),
                side: OrderSide::Buy,
                price: quote.mid_price,
            })
            .collect(),
        // The basket pays out whichever outcome wins.
        probability: Decimal::ONE,
        expected_return_pct,
        annualized_return_pct: None,
        confidence_score,
        suggested_size,
        max_size: config.max_position_size,
        hours_to_resolution: market.hours_to_resolution(now),
        volume_24h: market.volume_24h,
        details: OpportunityDetails::IntraMarket { price_sum, margin },
        detected_at: now,
    }))
}

fn margin_of(opportunity: &Opportunity) -> Decimal {
    match opportunity.details {
        OpportunityDetails::IntraMarket { margin, .. } => margin,
        _ => Decimal::ZERO,
    }
}

#[async_trait]
impl OpportunityStrategy for IntraMarketStrategy {
    fn trade_type(&self) -> TradeType {
        TradeType::IntraMarket
    }

    fn name(&self) -> &'static str {
        "Intra-Market Arbitrage"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn scan_opportunities(&self) -> Result<Vec<Opportunity>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        let config = self.config().await;
        let started = Utc::now();

        let markets = match self
            .market_data
            .list_markets(true, config.market_scan_limit, 0)
            .await
        {
            Ok(markets) => markets,
            Err(e) => {
                self.stats.write().await.record_failure(started);
                return Err(e);
            }
        };

        let candidates: Vec<&Market> = markets
            .iter()
            .filter(|m| m.is_binary() && !m.closed && m.volume_24h >= config.min_volume_24h)
            .collect();

        let mut opportunities = Vec::new();
        let mut errors = 0;
        for market in &candidates {
            let quotes = match fetch_quotes(self.market_data.as_ref(), market).await {
                Ok(quotes) => quotes,
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "Failed to fetch prices");
                    errors += 1;
                    continue;
                }
            };
            match evaluate_market(&config, market, &quotes, Utc::now()) {
                Ok(Some(opportunity)) => opportunities.push(opportunity),
                Ok(None) => {}
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "Failed to score market");
                    errors += 1;
                }
            }
        }

        opportunities.sort_by(|a, b| {
            margin_of(b)
                .cmp(&margin_of(a))
                .then_with(|| a.market_id.cmp(&b.market_id))
        });

        self.stats
            .write()
            .await
            .record(candidates.len(), opportunities.len(), errors, started);

        if !opportunities.is_empty() {
            info!(found = opportunities.len(), "Intra-market opportunities found");
        }

        Ok(opportunities)
    }

    async fn status(&self) -> StrategyStatus {
        self.stats
            .read()
            .await
            .to_status(self.name(), self.trade_type(), self.is_enabled())
    }
}
