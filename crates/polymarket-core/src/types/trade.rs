//! Trade lifecycle records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::order::OrderSide;
use crate::{Error, Result};

/// Prefix of synthetic order ids issued in dry-run mode.
pub const DRY_RUN_PREFIX: &str = "dry-run-";

/// Strategy family that produced a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Endgame,
    CrossPlatform,
    IntraMarket,
}

impl TradeType {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeType::Endgame => "endgame",
            TradeType::CrossPlatform => "cross_platform",
            TradeType::IntraMarket => "intra_market",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "endgame" => Ok(TradeType::Endgame),
            "cross_platform" => Ok(TradeType::CrossPlatform),
            "intra_market" => Ok(TradeType::IntraMarket),
            other => Err(Error::Validation(format!("unknown trade type: {}", other))),
        }
    }
}

/// Lifecycle status of a trade.
///
/// The main sequence is `Pending -> Executed -> Filled -> Resolved`;
/// `Cancelled` and `Failed` are terminal alternates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Record created, order not yet acknowledged.
    Pending,
    /// Order accepted by the exchange.
    Executed,
    /// Order filled, position open.
    Filled,
    /// Market settled (or position closed), P&L realized.
    Resolved,
    Cancelled,
    Failed,
}

impl TradeStatus {
    /// Statuses that still hold or may hold a position.
    pub const ACTIVE: [TradeStatus; 3] = [
        TradeStatus::Pending,
        TradeStatus::Executed,
        TradeStatus::Filled,
    ];

    fn rank(self) -> u8 {
        match self {
            TradeStatus::Pending => 0,
            TradeStatus::Executed => 1,
            TradeStatus::Filled => 2,
            TradeStatus::Resolved => 3,
            TradeStatus::Cancelled | TradeStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Resolved | TradeStatus::Cancelled | TradeStatus::Failed
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Capital is committed once the exchange has accepted the order.
    pub fn counts_as_exposure(self) -> bool {
        matches!(self, TradeStatus::Executed | TradeStatus::Filled)
    }

    /// Whether a trade may move from `self` to `next`.
    ///
    /// Staying in the same non-terminal status is allowed so fields can be
    /// refreshed without a status change.
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TradeStatus::Cancelled | TradeStatus::Failed => true,
            _ => next.rank() >= self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Executed => "executed",
            TradeStatus::Filled => "filled",
            TradeStatus::Resolved => "resolved",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "executed" => Ok(TradeStatus::Executed),
            "filled" => Ok(TradeStatus::Filled),
            "resolved" => Ok(TradeStatus::Resolved),
            "cancelled" => Ok(TradeStatus::Cancelled),
            "failed" => Ok(TradeStatus::Failed),
            other => Err(Error::Validation(format!("unknown trade status: {}", other))),
        }
    }
}

/// A single order lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    /// Exchange order id once the order is accepted.
    pub external_id: Option<String>,
    pub market_id: String,
    pub token_id: String,
    /// Outcome name of the traded token (e.g. "Yes").
    pub outcome: String,
    pub trade_type: TradeType,
    pub side: OrderSide,
    /// Requested shares.
    pub size: Decimal,
    /// Requested price per share.
    pub price: Decimal,
    pub status: TradeStatus,
    pub filled_size: Decimal,
    pub average_price: Option<Decimal>,
    /// `size * price` at creation.
    pub cost_basis: Decimal,
    pub fees: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub strategy_data: serde_json::Value,
    pub expected_probability: Option<Decimal>,
    pub expected_return_pct: Option<Decimal>,
    /// Set on stop-loss trades: the trade being closed out.
    pub stop_loss_for: Option<Uuid>,
    pub stop_loss_price: Option<Decimal>,
    pub risk_score: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fields required to create a trade record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub market_id: String,
    pub token_id: String,
    pub outcome: String,
    pub trade_type: TradeType,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
    pub status: TradeStatus,
    pub external_id: Option<String>,
    pub strategy_data: serde_json::Value,
    pub expected_probability: Option<Decimal>,
    pub expected_return_pct: Option<Decimal>,
    pub stop_loss_for: Option<Uuid>,
    pub risk_score: Option<Decimal>,
}

/// Optional field changes applied alongside a status transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub external_id: Option<String>,
    pub filled_size: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    /// Price at which a stop-loss order was placed against this trade.
    pub stop_loss_price: Option<Decimal>,
}

impl Trade {
    /// Build a trade from creation fields, enforcing `cost_basis == size * price`.
    pub fn from_new(new: NewTrade, now: DateTime<Utc>) -> Result<Self> {
        if new.size <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "trade size must be positive, got {}",
                new.size
            )));
        }
        if new.price <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "trade price must be positive, got {}",
                new.price
            )));
        }

        let executed_at = (new.status == TradeStatus::Executed).then_some(now);
        Ok(Self {
            id: Uuid::new_v4(),
            external_id: new.external_id,
            market_id: new.market_id,
            token_id: new.token_id,
            outcome: new.outcome,
            trade_type: new.trade_type,
            side: new.side,
            size: new.size,
            price: new.price,
            status: new.status,
            filled_size: Decimal::ZERO,
            average_price: None,
            cost_basis: new.size * new.price,
            fees: Decimal::ZERO,
            realized_pnl: None,
            unrealized_pnl: None,
            strategy_data: new.strategy_data,
            expected_probability: new.expected_probability,
            expected_return_pct: new.expected_return_pct,
            stop_loss_for: new.stop_loss_for,
            stop_loss_price: None,
            risk_score: new.risk_score,
            created_at: now,
            executed_at,
            resolved_at: None,
        })
    }

    /// Apply a status transition and field updates.
    ///
    /// Nothing is mutated when the transition or the fill size is invalid.
    pub fn apply_update(
        &mut self,
        status: TradeStatus,
        update: &TradeUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        if let Some(filled) = update.filled_size {
            if filled < Decimal::ZERO || filled > self.size {
                return Err(Error::Validation(format!(
                    "filled size {} outside [0, {}]",
                    filled, self.size
                )));
            }
        }

        if status == TradeStatus::Executed && self.status != TradeStatus::Executed {
            self.executed_at = Some(now);
        }
        if status == TradeStatus::Resolved {
            self.resolved_at = Some(now);
        }
        self.status = status;

        if let Some(external_id) = &update.external_id {
            self.external_id = Some(external_id.clone());
        }
        if let Some(filled) = update.filled_size {
            self.filled_size = filled;
        }
        if let Some(price) = update.average_price {
            self.average_price = Some(price);
        }
        if let Some(fees) = update.fees {
            self.fees = fees;
        }
        if let Some(pnl) = update.realized_pnl {
            self.realized_pnl = Some(pnl);
        }
        if let Some(pnl) = update.unrealized_pnl {
            self.unrealized_pnl = Some(pnl);
        }
        if let Some(price) = update.stop_loss_price {
            self.stop_loss_price = Some(price);
        }
        Ok(())
    }

    /// Filled size when known, otherwise the requested size.
    pub fn effective_size(&self) -> Decimal {
        if self.filled_size > Decimal::ZERO {
            self.filled_size
        } else {
            self.size
        }
    }

    /// Average fill price when known, otherwise the requested price.
    pub fn entry_price(&self) -> Decimal {
        self.average_price.unwrap_or(self.price)
    }

    /// Realized P&L when the market settles with `payout` per share (1 or 0).
    ///
    /// BUY: `size * payout - cost_basis`. SELL is the mirror image.
    pub fn settlement_pnl(&self, payout: Decimal) -> Decimal {
        let long_pnl = self.effective_size() * payout - self.cost_basis;
        match self.side {
            OrderSide::Buy => long_pnl,
            OrderSide::Sell => -long_pnl,
        }
    }

    /// P&L of closing the position at `exit_price`.
    pub fn exit_pnl(&self, exit_price: Decimal) -> Decimal {
        let long_pnl = self.effective_size() * (exit_price - self.entry_price());
        match self.side {
            OrderSide::Buy => long_pnl,
            OrderSide::Sell => -long_pnl,
        }
    }

    pub fn is_stop_loss(&self) -> bool {
        self.stop_loss_for.is_some()
    }

    /// Placed in dry run: no exchange cash backs the position.
    pub fn is_simulated(&self) -> bool {
        self.external_id
            .as_deref()
            .is_some_and(|id| id.starts_with(DRY_RUN_PREFIX))
    }
}

/// Aggregate performance over resolved trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    /// Gross wins over gross losses; `None` when there were no losses.
    pub profit_factor: Option<Decimal>,
}

impl PerformanceMetrics {
    /// Summarize resolved trades. Returns `None` when there is nothing to summarize.
    pub fn from_resolved<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Option<Self> {
        let pnls: Vec<Decimal> = trades
            .into_iter()
            .filter(|t| t.status == TradeStatus::Resolved)
            .map(|t| t.realized_pnl.unwrap_or_default())
            .collect();
        if pnls.is_empty() {
            return None;
        }

        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();
        let gross_win: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum();
        let total = pnls.len() as u64;

        Some(Self {
            total_trades: total,
            winning_trades: wins.len() as u64,
            losing_trades: losses.len() as u64,
            win_rate: Decimal::from(wins.len() as u64) / Decimal::from(total),
            total_pnl: pnls.iter().sum(),
            average_win: if wins.is_empty() {
                Decimal::ZERO
            } else {
                gross_win / Decimal::from(wins.len() as u64)
            },
            average_loss: if losses.is_empty() {
                Decimal::ZERO
            } else {
                gross_loss / Decimal::from(losses.len() as u64)
            },
            profit_factor: if losses.is_empty() {
                None
            } else {
                Some((gross_win / gross_loss).abs())
            },
        })
    }
}
