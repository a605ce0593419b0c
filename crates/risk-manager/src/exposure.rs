//! Capital committed per market.

use polymarket_core::types::Trade;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Exposure built from the current active trades.
///
/// Only EXECUTED and FILLED trades count; their cost basis is the exposure.
#[derive(Debug, Clone, Default)]
pub struct ExposureTracker {
    market_exposures: HashMap<String, Decimal>,
    total_exposure: Decimal,
    /// Part of the total placed in dry run.
    simulated_exposure: Decimal,
}

impl ExposureTracker {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut tracker = Self::default();
        for trade in trades {
            if !trade.status.counts_as_exposure() {
                continue;
            }
            *tracker
                .market_exposures
                .entry(trade.market_id.clone())
                .or_default() += trade.cost_basis;
            tracker.total_exposure += trade.cost_basis;
            if trade.is_simulated() {
                tracker.simulated_exposure += trade.cost_basis;
            }
        }
        tracker
    }

    pub fn market_exposure(&self, market_id: &str) -> Decimal {
        self.market_exposures
            .get(market_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_exposure(&self) -> Decimal {
        self.total_exposure
    }

    /// Exposure from dry-run fills, which never debit exchange cash.
    pub fn simulated_exposure(&self) -> Decimal {
        self.simulated_exposure
    }

    /// Exchange cash net of dry-run commitments.
    pub fn available_cash(&self, exchange_cash: Decimal) -> Decimal {
        (exchange_cash - self.simulated_exposure).max(Decimal::ZERO)
    }

    /// Share of `portfolio_value` committed to `market_id`; zero for an empty portfolio.
    pub fn market_exposure_pct(&self, market_id: &str, portfolio_value: Decimal) -> Decimal {
        if portfolio_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.market_exposure(market_id) / portfolio_value
    }
}
