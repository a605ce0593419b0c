//! Daily portfolio rollups.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Daily rollup of value, P&L and trade counts. One row per date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub positions_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub daily_return_pct: Option<Decimal>,
    pub total_return_pct: Option<Decimal>,
    pub max_drawdown_pct: Option<Decimal>,
    pub trades_today: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub created_at: DateTime<Utc>,
}
