//! Risk assessment inputs and results.

use polymarket_core::types::TradeType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a trade's risk, ordered from LOW to CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Numeric form stored on trade records (25 per level).
    pub fn score(self) -> Decimal {
        match self {
            RiskLevel::Low => Decimal::new(25, 0),
            RiskLevel::Medium => Decimal::new(50, 0),
            RiskLevel::High => Decimal::new(75, 0),
            RiskLevel::Critical => Decimal::ONE_HUNDRED,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market facts the assessment needs beyond price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub volume_24h: Decimal,
    pub hours_to_resolution: Option<Decimal>,
}

/// A proposed trade. `size` is in shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRiskRequest {
    pub market_id: String,
    pub token_id: String,
    pub trade_type: TradeType,
    pub size: Decimal,
    pub price: Decimal,
    pub probability: Decimal,
    pub market: MarketContext,
}

/// Outcome of a risk check. Produced per request and only logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub approved: bool,
    pub risk_level: RiskLevel,
    /// Approved size in shares; zero when not approved.
    pub max_position_size: Decimal,
    /// Blocking reasons.
    pub reasons: Vec<String>,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
}

impl RiskAssessment {
    /// Unapproved CRITICAL result for an assessment that could not be computed.
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            risk_level: RiskLevel::Critical,
            max_position_size: Decimal::ZERO,
            reasons: vec![reason.into()],
            warnings: Vec::new(),
        }
    }

    /// Reasons joined for audit logs.
    pub fn rejection_summary(&self) -> String {
        if self.reasons.is_empty() {
            format!("risk level {}", self.risk_level)
        } else {
            self.reasons.join("; ")
        }
    }
}

/// Accumulates check results while an assessment runs.
#[derive(Debug)]
pub(crate) struct AssessmentBuilder {
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl AssessmentBuilder {
    pub fn new() -> Self {
        Self {
            risk_level: RiskLevel::Low,
            reasons: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Blocking finding; raises the level to at least `level`.
    pub fn block(&mut self, level: RiskLevel, reason: String) {
        self.reasons.push(reason);
        self.raise(level);
    }

    /// Non-blocking finding; raises the level to at least `level`.
    pub fn warn(&mut self, level: RiskLevel, warning: String) {
        self.warnings.push(warning);
        self.raise(level);
    }

    fn raise(&mut self, level: RiskLevel) {
        self.risk_level = self.risk_level.max(level);
    }

    /// Final decision. `cap` is the value-based share limit.
    pub fn finish(self, requested: Decimal, cap: Decimal) -> RiskAssessment {
        let approved = self.reasons.is_empty() && self.risk_level != RiskLevel::Critical;
        let max_position_size = if approved {
            let size = cap.min(requested);
            let scaled = match self.risk_level {
                RiskLevel::High => size * Decimal::new(5, 1),
                RiskLevel::Medium => size * Decimal::new(8, 1),
                _ => size,
            };
            scaled.max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        RiskAssessment {
            approved,
            risk_level: self.risk_level,
            max_position_size,
            reasons: self.reasons,
            warnings: self.warnings,
        }
    }
}
