//! Cross-platform arbitrage: price gaps between the primary venue and an
//! external venue listing the same event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polymarket_core::config::CrossPlatformConfig;
use polymarket_core::providers::ExternalMarket;
use polymarket_core::types::{
    CrossPlatformDirection, Market, Opportunity, OpportunityDetails, OpportunityLeg, OrderSide,
    PriceQuote, TradeType,
};
use polymarket_core::{ExternalMarketProvider, MarketDataProvider, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::keywords::{jaccard, key_terms};
use crate::scoring::{cap_confidence, category_points, mentions_any, points_at_least};
use crate::status::ScanStats;
use crate::{fetch_quotes, OpportunityStrategy, StrategyStatus};

/// Cross-platform strategy over the primary venue and one external venue.
pub struct CrossPlatformStrategy {
    config: RwLock<CrossPlatformConfig>,
    /// `enabled && external_enabled`.
    active: AtomicBool,
    market_data: Arc<dyn MarketDataProvider>,
    external: Arc<dyn ExternalMarketProvider>,
    stats: RwLock<ScanStats>,
}

impl CrossPlatformStrategy {
    pub fn new(
        config: CrossPlatformConfig,
        market_data: Arc<dyn MarketDataProvider>,
        external: Arc<dyn ExternalMarketProvider>,
    ) -> Self {
        Self {
            active: AtomicBool::new(config.enabled && config.external_enabled),
            config: RwLock::new(config),
            market_data,
            external,
            stats: RwLock::new(ScanStats::default()),
        }
    }

    pub async fn config(&self) -> CrossPlatformConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: CrossPlatformConfig) {
        self.active
            .store(config.enabled && config.external_enabled, Ordering::SeqCst);
        *self.config.write().await = config;
        info!("Cross-platform strategy configuration updated");
    }
}

/// Pair each primary market with its first external match above the threshold.
pub fn match_markets<'a>(
    primary: &'a [Market],
    external: &'a [ExternalMarket],
    threshold: Decimal,
) -> Vec<(&'a Market, &'a ExternalMarket)> {
    let external_terms: Vec<(HashSet<String>, &ExternalMarket)> =
        external.iter().map(|m| (key_terms(&m.question), m)).collect();

    primary
        .iter()
        .filter_map(|market| {
            let terms = key_terms(&market.question);
            external_terms
                .iter()
                .find(|(other, _)| jaccard(&terms, other) > threshold)
                .map(|(_, other)| (market, *other))
        })
        .collect()
}

/// Best-margin outcome of a matched pair.
///
/// `Ok(None)` when no outcome is priced on both venues with a gap of at
/// least the minimum spread.
pub fn evaluate_pair(
    config: &CrossPlatformConfig,
    venue: &str,
    market: &Market,
    external: &ExternalMarket,
    quotes: &HashMap<String, PriceQuote>,
    now: DateTime<Utc>,
) -> Result<Option<Opportunity>> {
    let mut best: Option<(&PriceQuote, Decimal, Decimal, Decimal)> = None;

    for token in &market.tokens {
        let Some(quote) = quotes.get(&token.token_id) else {
            continue;
        };
        let Some(external_price) = external.price_for(&quote.outcome) else {
            continue;
        };
        let primary_price = quote.mid_price;
        let difference = (primary_price - external_price).abs();
        if difference < config.min_spread {
            continue;
        }
        let Some(ratio) = difference.checked_div(primary_price.min(external_price)) else {
            debug!(market_id = %market.id, outcome = %quote.outcome, "Zero price on one venue");
            continue;
        };
        if ratio <= Decimal::ZERO {
            continue;
        }
        let profit_pct = ratio * Decimal::ONE_HUNDRED;
        match best {
            Some((_, _, _, best_pct)) if profit_pct <= best_pct => {}
            _ => best = Some((quote, external_price, difference, profit_pct)),
        }
    }

    let Some((quote, external_price, difference, profit_pct)) = best else {
        return Ok(None);
    };

    let (direction, side) = if quote.mid_price < external_price {
        (CrossPlatformDirection::BuyPrimarySellExternal, OrderSide::Buy)
    } else {
        (CrossPlatformDirection::SellPrimaryBuyExternal, OrderSide::Sell)
    };

    let confidence_score = confidence(config, market, external, difference);
    let suggested_size = suggested_size(config, confidence_score, profit_pct);
    let max_size = (suggested_size * config.max_size_multiplier).min(config.max_position_size);

    Ok(Some(Opportunity {
        trade_type: TradeType::CrossPlatform,
        market_id: market.id.clone(),
        question: market.question.clone(),
        legs: vec![OpportunityLeg {
            token_id: quote.token_id.clone(),
            outcome: quote.outcome.clone(),
            side,
            price: quote.mid_price,
        }],
        probability: quote.mid_price,
        expected_return_pct: profit_pct,
        annualized_return_pct: None,
        confidence_score,
        suggested_size,
        max_size,
        hours_to_resolution: market.hours_to_resolution(now),
        volume_24h: market.volume_24h,
        details: OpportunityDetails::CrossPlatform {
            external_venue: venue.to_string(),
            external_market_id: external.id.clone(),
            external_price,
            price_difference: difference,
            direction,
            execution_notes: execution_notes(direction, &quote.outcome, quote.mid_price, venue, external_price),
            requires_external_account: true,
        },
        detected_at: now,
    }))
}

/// Price gap, shared volume, category stability and question clarity points.
pub fn confidence(
    config: &CrossPlatformConfig,
    market: &Market,
    external: &ExternalMarket,
    difference: Decimal,
) -> Decimal {
    let scoring = &config.scoring;
    let clarity = if mentions_any(&market.question, &scoring.objective_terms) {
        scoring.objective_points
    } else if mentions_any(&market.question, &scoring.quantitative_terms) {
        scoring.quantitative_points
    } else {
        scoring.default_clarity_points
    };

    let score = points_at_least(&scoring.price_difference_tiers, difference)
        + points_at_least(
            &scoring.volume_tiers,
            market.volume_24h.min(external.volume_24h),
        )
        + category_points(&scoring.category_points, market.category.as_deref())
        + clarity;
    cap_confidence(score)
}

/// Suggested notional in USD.
pub fn suggested_size(config: &CrossPlatformConfig, confidence: Decimal, profit_pct: Decimal) -> Decimal {
    let confidence_multiplier = confidence / Decimal::new(50, 0);
    let profit_multiplier =
        (profit_pct / config.profit_divisor_pct).min(config.max_profit_multiplier);
    (config.base_size * confidence_multiplier * profit_multiplier).min(config.max_suggested_size)
}

fn execution_notes(
    direction: CrossPlatformDirection,
    outcome: &str,
    primary_price: Decimal,
    venue: &str,
    external_price: Decimal,
) -> String {
    match direction {
        CrossPlatformDirection::BuyPrimarySellExternal => format!(
            "Buy {} on Polymarket at ${}, sell on {} at ${}",
            outcome,
            primary_price.round_dp(3),
            venue,
            external_price.round_dp(3)
        ),
        CrossPlatformDirection::SellPrimaryBuyExternal => format!(
            "Sell {} on Polymarket at ${}, buy on {} at ${}",
            outcome,
            primary_price.round_dp(3),
            venue,
            external_price.round_dp(3)
        ),
    }
}

#[async_trait]
impl OpportunityStrategy for CrossPlatformStrategy {
    fn trade_type(&self) -> TradeType {
        TradeType::CrossPlatform
    }

    fn name(&self) -> &'static str {
        "Cross-Platform Arbitrage"
    }

    fn is_enabled(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn scan_opportunities(&self) -> Result<Vec<Opportunity>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        let config = self.config().await;
        let started = Utc::now();

        let listings = async {
            let primary = self
                .market_data
                .list_markets(true, config.market_scan_limit, 0)
                .await?;
            let external = self.external.list_markets().await?;
            Ok::<_, polymarket_core::Error>((primary, external))
        }
        .await;
        let (primary, external) = match listings {
            Ok(listings) => listings,
            Err(e) => {
                self.stats.write().await.record_failure(started);
                return Err(e);
            }
        };

        let primary: Vec<Market> = primary
            .into_iter()
            .filter(|m| m.volume_24h >= config.min_volume_24h)
            .collect();
        let pairs = match_markets(&primary, &external, config.similarity_threshold);
        debug!(pairs = pairs.len(), venue = %self.external.venue(), "Matched market pairs");

        let mut opportunities = Vec::new();
        let mut errors = 0;
        for (market, other) in &pairs {
            let quotes = match fetch_quotes(self.market_data.as_ref(), market).await {
                Ok(quotes) => quotes,
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "Failed to fetch prices");
                    errors += 1;
                    continue;
                }
            };
            match evaluate_pair(&config, self.external.venue(), market, other, &quotes, Utc::now()) {
                Ok(Some(opportunity)) => opportunities.push(opportunity),
                Ok(None) => {}
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "Failed to score market pair");
                    errors += 1;
                }
            }
        }

        opportunities.sort_by(|a, b| {
            b.expected_return_pct
                .cmp(&a.expected_return_pct)
                .then_with(|| b.confidence_score.cmp(&a.confidence_score))
                .then_with(|| a.market_id.cmp(&b.market_id))
        });
        opportunities.truncate(config.max_results);

        self.stats
            .write()
            .await
            .record(pairs.len(), opportunities.len(), errors, started);

        if let Some(best) = opportunities.first() {
            info!(
                found = opportunities.len(),
                best_market = %best.market_id,
                spread_pct = %best.expected_return_pct.round_dp(1),
                "Cross-platform opportunities found"
            );
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
