//! Ranked trade candidates and their audit log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderSide;
use super::trade::TradeType;

/// One order a candidate wants placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityLeg {
    pub token_id: String,
    pub outcome: String,
    pub side: OrderSide,
    pub price: Decimal,
}

/// Strategy-specific detail attached to a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpportunityDetails {
    Endgame {
        spread: Decimal,
        liquidity_score: Decimal,
    },
    CrossPlatform {
        external_venue: String,
        external_market_id: String,
        external_price: Decimal,
        price_difference: Decimal,
        direction: CrossPlatformDirection,
        execution_notes: String,
        requires_external_account: bool,
    },
    IntraMarket {
        price_sum: Decimal,
        margin: Decimal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossPlatformDirection {
    BuyPrimarySellExternal,
    SellPrimaryBuyExternal,
}

/// A ranked, confidence-scored trade candidate produced by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub trade_type: TradeType,
    pub market_id: String,
    pub question: String,
    /// Orders to place; the first leg is the primary one.
    pub legs: Vec<OpportunityLeg>,
    /// Implied probability of the primary leg's outcome.
    pub probability: Decimal,
    /// Simple return in percent.
    pub expected_return_pct: Decimal,
    pub annualized_return_pct: Option<Decimal>,
    /// 0-100.
    pub confidence_score: Decimal,
    /// Suggested notional in USD.
    pub suggested_size: Decimal,
    /// Maximum notional in USD.
    pub max_size: Decimal,
    pub hours_to_resolution: Option<Decimal>,
    pub volume_24h: Decimal,
    pub details: OpportunityDetails,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn primary_leg(&self) -> Option<&OpportunityLeg> {
        self.legs.first()
    }

    /// Cost of one unit across all legs (one share of each).
    pub fn unit_price(&self) -> Decimal {
        self.legs.iter().map(|l| l.price).sum()
    }
}

/// One row per detected candidate, executed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityLog {
    pub id: Uuid,
    pub opportunity_type: TradeType,
    pub market_id: String,
    pub detected_at: DateTime<Utc>,
    pub expected_profit_pct: Decimal,
    pub expected_return_annualized: Option<Decimal>,
    pub confidence_score: Option<Decimal>,
    pub market_data: serde_json::Value,
    pub executed: bool,
    pub trade_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
}

/// Fields required to log a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunityLog {
    pub opportunity_type: TradeType,
    pub market_id: String,
    pub expected_profit_pct: Decimal,
    pub expected_return_annualized: Option<Decimal>,
    pub confidence_score: Option<Decimal>,
    pub market_data: serde_json::Value,
}

impl NewOpportunityLog {
    /// Snapshot a candidate for the audit log.
    pub fn from_opportunity(opportunity: &Opportunity) -> Self {
        Self {
            opportunity_type: opportunity.trade_type,
            market_id: opportunity.market_id.clone(),
            expected_profit_pct: opportunity.expected_return_pct,
            expected_return_annualized: opportunity.annualized_return_pct,
            confidence_score: Some(opportunity.confidence_score),
            market_data: serde_json::to_value(opportunity).unwrap_or(serde_json::Value::Null),
        }
    }
}

impl OpportunityLog {
    pub fn from_new(new: NewOpportunityLog, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_type: new.opportunity_type,
            market_id: new.market_id,
            detected_at: now,
            expected_profit_pct: new.expected_profit_pct,
            expected_return_annualized: new.expected_return_annualized,
            confidence_score: new.confidence_score,
            market_data: new.market_data,
            executed: false,
            trade_id: None,
            rejection_reason: None,
        }
    }
}
