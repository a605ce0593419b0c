//! Endgame arbitrage: buy near-certain outcomes shortly before resolution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polymarket_core::config::EndgameConfig;
use polymarket_core::types::{
    Market, Opportunity, OpportunityDetails, OpportunityLeg, OrderSide, PriceQuote, TradeType,
};
use polymarket_core::{Error, MarketDataProvider, Result};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::scoring::{cap_confidence, keyword_bonus, points_at_least, points_at_most};
use crate::status::ScanStats;
use crate::{fetch_quotes, OpportunityStrategy, StrategyStatus};

const HOURS_PER_YEAR: Decimal = Decimal::from_parts(8760, 0, 0, false, 0);
const BASIS_POINTS: Decimal = Decimal::from_parts(10000, 0, 0, false, 0);

/// Endgame strategy over a market data provider.
pub struct EndgameStrategy {
    config: RwLock<EndgameConfig>,
    enabled: AtomicBool,
    market_data: Arc<dyn MarketDataProvider>,
    stats: RwLock<ScanStats>,
}

impl EndgameStrategy {
    pub fn new(config: EndgameConfig, market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config: RwLock::new(config),
            market_data,
            stats: RwLock::new(ScanStats::default()),
        }
    }

    pub async fn config(&self) -> EndgameConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: EndgameConfig) {
        self.enabled.store(config.enabled, AtomicOrdering::SeqCst);
        *self.config.write().await = config;
        info!("Endgame strategy configuration updated");
    }
}

/// Whether a market's timing and volume put it in scope.
pub fn is_candidate_market(config: &EndgameConfig, market: &Market, now: DateTime<Utc>) -> bool {
    if !market.active || market.closed || market.resolved {
        return false;
    }
    let Some(hours) = market.hours_to_resolution(now) else {
        return false;
    };
    hours > Decimal::ZERO
        && hours <= Decimal::from(config.max_hours_to_resolution)
        && market.volume_24h >= config.min_volume_24h
}

/// Best endgame candidate in one market.
///
/// `Ok(None)` when no outcome qualifies; `Err` when the numbers cannot be
/// computed.
pub fn evaluate_market(
    config: &EndgameConfig,
    market: &Market,
    quotes: &HashMap<String, PriceQuote>,
    now: DateTime<Utc>,
) -> Result<Option<Opportunity>> {
    let Some(hours) = market.hours_to_resolution(now) else {
        return Ok(None);
    };
    if hours <= Decimal::ZERO {
        return Ok(None);
    }

    let max_spread = Decimal::from(config.max_spread_bps) / BASIS_POINTS;
    let mut best: Option<(&PriceQuote, Decimal, Decimal)> = None;

    // Token order keeps the pick deterministic when returns tie.
    for token in &market.tokens {
        let Some(quote) = quotes.get(&token.token_id) else {
            continue;
        };
        let probability = quote.mid_price;
        if probability < config.min_probability || probability >= Decimal::ONE {
            continue;
        }
        let spread_ratio = quote.spread_ratio().ok_or_else(|| {
            Error::Computation(format!("zero mid-price for token {}", quote.token_id))
        })?;
        if spread_ratio > max_spread {
            debug!(
                market_id = %market.id,
                token_id = %quote.token_id,
                spread_ratio = %spread_ratio,
                "Spread too wide"
            );
            continue;
        }

        let simple_return = (Decimal::ONE - probability)
            .checked_div(probability)
            .ok_or_else(|| Error::Computation("return overflow".to_string()))?;
        match best {
            Some((_, best_return, _)) if simple_return <= best_return => {}
            _ => best = Some((quote, simple_return, spread_ratio)),
        }
    }

    let Some((quote, simple_return, spread_ratio)) = best else {
        return Ok(None);
    };

    let expected_return_pct = simple_return * Decimal::ONE_HUNDRED;
    let annualized_return_pct = expected_return_pct
        .checked_mul(HOURS_PER_YEAR)
        .and_then(|v| v.checked_div(hours))
        .ok_or_else(|| Error::Computation("annualized return overflow".to_string()))?;

    let confidence_score = confidence(config, market, quote.mid_price, hours);
    let suggested_size = suggested_size(config, confidence_score, expected_return_pct, hours);
    let max_size = max_size(config, market.volume_24h, suggested_size);

    Ok(Some(Opportunity {
        trade_type: TradeType::Endgame,
        market_id: market.id.clone(),
        question: market.question.clone(),
        legs: vec![OpportunityLeg {
            token_id: quote.token_id.clone(),
            outcome: quote.outcome.clone(),
            side: OrderSide::Buy,
            price: quote.mid_price,
        }],
        probability: quote.mid_price,
        expected_return_pct,
        annualized_return_pct: Some(annualized_return_pct),
        confidence_score,
        suggested_size,
        max_size,
        hours_to_resolution: Some(hours),
        volume_24h: market.volume_24h,
        details: OpportunityDetails::Endgame {
            spread: quote.spread,
            liquidity_score: liquidity_score(quote, spread_ratio),
        },
        detected_at: now,
    }))
}

/// Depth (up to 50) plus tightness (up to 50).
pub fn liquidity_score(quote: &PriceQuote, spread_ratio: Decimal) -> Decimal {
    let avg_size = (quote.bid_size + quote.ask_size) / Decimal::TWO;
    let depth = (avg_size / Decimal::ONE_HUNDRED).min(Decimal::new(50, 0));
    let tightness = (Decimal::new(50, 0) - spread_ratio * Decimal::new(1000, 0)).max(Decimal::ZERO);
    depth + tightness
}

/// Probability, time, volume and keyword points, capped at 100.
pub fn confidence(
    config: &EndgameConfig,
    market: &Market,
    probability: Decimal,
    hours: Decimal,
) -> Decimal {
    let scoring = &config.scoring;
    let score = points_at_least(&scoring.probability_tiers, probability)
        + points_at_most(&scoring.hours_tiers, hours)
        + points_at_least(&scoring.volume_tiers, market.volume_24h)
        + keyword_bonus(
            &scoring.keyword_bonuses,
            &market.question,
            market.category.as_deref(),
        );
    cap_confidence(score)
}

/// Suggested notional in USD.
pub fn suggested_size(
    config: &EndgameConfig,
    confidence: Decimal,
    expected_return_pct: Decimal,
    hours: Decimal,
) -> Decimal {
    let confidence_multiplier = confidence / Decimal::new(50, 0);
    let return_multiplier =
        (expected_return_pct / config.return_divisor_pct).min(config.max_return_multiplier);
    let time_multiplier = if hours <= config.time_boost_hours {
        config.time_boost_multiplier
    } else {
        Decimal::ONE
    };
    (config.base_size * confidence_multiplier * return_multiplier * time_multiplier)
        .min(config.max_suggested_size)
}

/// Maximum notional in USD, bounded by recent hourly volume.
pub fn max_size(config: &EndgameConfig, volume_24h: Decimal, suggested: Decimal) -> Decimal {
    let volume_cap = volume_24h / Decimal::new(24, 0) * config.hourly_volume_fraction;
    volume_cap
        .min(suggested * Decimal::TWO)
        .min(config.max_position_size)
}

/// Highest annualized return first; confidence then market id break ties.
pub(crate) fn rank(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.annualized_return_pct
        .cmp(&a.annualized_return_pct)
        .then_with(|| b.confidence_score.cmp(&a.confidence_score))
        .then_with(|| a.market_id.cmp(&b.market_id))
}

#[async_trait]
impl OpportunityStrategy for EndgameStrategy {
    fn trade_type(&self) -> TradeType {
        TradeType::Endgame
    }

    fn name(&self) -> &'static str {
        "Endgame Arbitrage"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(AtomicOrdering::SeqCst)
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
            .filter(|m| is_candidate_market(&config, m, started))
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

        opportunities.sort_by(rank);
        opportunities.truncate(config.max_results);

        self.stats
            .write()
            .await
            .record(candidates.len(), opportunities.len(), errors, started);

        if let Some(best) = opportunities.first() {
            info!(
                found = opportunities.len(),
                scanned = candidates.len(),
                best_market = %best.market_id,
                best_return_pct = %best.expected_return_pct.round_dp(2),
                "Endgame opportunities found"
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
