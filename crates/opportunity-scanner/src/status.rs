//! Per-strategy scan statistics.

use chrono::{DateTime, Utc};
use polymarket_core::types::TradeType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Observability record for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub name: String,
    pub trade_type: TradeType,
    pub enabled: bool,
    /// Markets examined in the last scan.
    pub opportunities_scanned: u64,
    /// Candidates returned by the last scan.
    pub opportunities_found: u64,
    /// Markets skipped because of errors, over the strategy's lifetime.
    pub scan_errors: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub scan_duration_ms: u64,
    /// found / scanned × 100.
    pub success_rate: Decimal,
}

/// Mutable counters behind a strategy's status.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScanStats {
    scanned: u64,
    found: u64,
    errors: u64,
    last_scan: Option<DateTime<Utc>>,
    duration_ms: u64,
}

impl ScanStats {
    pub fn record(&mut self, scanned: usize, found: usize, errors: usize, started: DateTime<Utc>) {
        self.scanned = scanned as u64;
        self.found = found as u64;
        self.errors += errors as u64;
        self.last_scan = Some(started);
        self.duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
    }

    /// A scan that failed before examining any market.
    pub fn record_failure(&mut self, started: DateTime<Utc>) {
        self.record(0, 0, 1, started);
    }

    pub fn to_status(&self, name: &str, trade_type: TradeType, enabled: bool) -> StrategyStatus {
        let success_rate =
            Decimal::from(self.found) * Decimal::ONE_HUNDRED / Decimal::from(self.scanned.max(1));
        StrategyStatus {
            name: name.to_string(),
            trade_type,
            enabled,
            opportunities_scanned: self.scanned,
            opportunities_found: self.found,
            scan_errors: self.errors,
            last_scan: self.last_scan,
            scan_duration_ms: self.duration_ms,
            success_rate,
        }
    }
}
