//! Risk Manager
//!
//! Per-trade risk assessment, dynamic position limits, stop-loss checks and
//! the sticky emergency shutdown.

pub mod assessment;
pub mod engine;
pub mod error;
pub mod exposure;
pub mod limits;

pub use assessment::{MarketContext, RiskAssessment, RiskLevel, TradeRiskRequest};
pub use engine::{RiskEngine, RiskMetrics, ShutdownReason, ShutdownRecord};
pub use error::RiskError;
pub use exposure::ExposureTracker;
pub use limits::{DynamicLimits, TradingLimits};
