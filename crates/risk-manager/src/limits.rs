//! Position-size limits scaled by recent performance.

use polymarket_core::config::RiskConfig;
use polymarket_core::types::PerformanceMetrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static limits taken from configuration.
#[derive(Debug, Clone)]
pub struct TradingLimits {
    pub base_position_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub weekly_loss_limit_pct: Decimal,
    pub max_exposure_per_market: Decimal,
}

/// Limits after applying the performance and experience multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicLimits {
    pub max_position_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub weekly_loss_limit_pct: Decimal,
    pub performance_multiplier: Decimal,
    pub experience_multiplier: Decimal,
}

impl From<&RiskConfig> for TradingLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            base_position_pct: config.max_position_size_pct,
            daily_loss_limit_pct: config.max_daily_loss_pct,
            weekly_loss_limit_pct: config.max_weekly_loss_pct,
            max_exposure_per_market: config.max_exposure_per_market,
        }
    }
}

/// Multiplier on position size by win rate. Non-decreasing in `win_rate`.
pub fn performance_multiplier(win_rate: Decimal) -> Decimal {
    if win_rate < Decimal::new(4, 1) {
        Decimal::new(5, 1)
    } else if win_rate < Decimal::new(5, 1) {
        Decimal::new(7, 1)
    } else if win_rate <= Decimal::new(7, 1) {
        Decimal::ONE
    } else if win_rate <= Decimal::new(8, 1) {
        Decimal::new(12, 1)
    } else {
        Decimal::new(15, 1)
    }
}

/// Multiplier on position size by number of resolved trades.
pub fn experience_multiplier(total_trades: u64) -> Decimal {
    match total_trades {
        0..=9 => Decimal::new(5, 1),
        10..=49 => Decimal::new(8, 1),
        _ => Decimal::ONE,
    }
}

impl TradingLimits {
    /// Scale the base position percentage by recent performance.
    ///
    /// Without history the win rate is taken as 0.5 over zero trades.
    pub fn dynamic(&self, performance: Option<&PerformanceMetrics>) -> DynamicLimits {
        let (win_rate, total_trades) = performance
            .map(|p| (p.win_rate, p.total_trades))
            .unwrap_or((Decimal::new(5, 1), 0));

        let performance_multiplier = performance_multiplier(win_rate);
        let experience_multiplier = experience_multiplier(total_trades);

        DynamicLimits {
            max_position_pct: self.base_position_pct
                * performance_multiplier
                * experience_multiplier,
            daily_loss_limit_pct: self.daily_loss_limit_pct,
            weekly_loss_limit_pct: self.weekly_loss_limit_pct,
            performance_multiplier,
            experience_multiplier,
        }
    }
}
