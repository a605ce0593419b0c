//! Errors raised while computing risk inputs.

use rust_decimal::Decimal;
use thiserror::Error;

/// A failure that prevents a risk decision from being computed.
///
/// Assessments never surface this to callers; it is folded into an
/// unapproved CRITICAL result.
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("store or provider error: {0}")]
    Core(#[from] polymarket_core::Error),

    #[error("portfolio value unavailable (got {0})")]
    NoPortfolioValue(Decimal),

    #[error("invalid trade input: {0}")]
    InvalidInput(String),

    #[error("computation error: {0}")]
    Computation(String),
}

pub type Result<T> = std::result::Result<T, RiskError>;
