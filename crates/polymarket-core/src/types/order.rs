//! Order types for trading execution.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(Error::Validation(format!("invalid order side: {}", other))),
        }
    }
}

/// Current status of an order as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting on the book, nothing filled yet.
    Open,
    /// Order partially filled.
    PartiallyFilled,
    /// Order fully filled.
    Filled,
    /// Order cancelled.
    Cancelled,
    /// Order rejected by exchange.
    Rejected,
}

/// A limit order ready to be submitted to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    /// Number of shares.
    pub size: Decimal,
    /// Limit price per share, strictly between 0 and 1.
    pub price: Decimal,
}

impl OrderRequest {
    pub fn new(
        market_id: impl Into<String>,
        token_id: impl Into<String>,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            token_id: token_id.into(),
            side,
            size,
            price,
        }
    }

    /// Reject orders the exchange would refuse before anything is submitted.
    pub fn validate(&self) -> Result<()> {
        if self.token_id.is_empty() {
            return Err(Error::Validation("token id is empty".to_string()));
        }
        if self.size <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "order size must be positive, got {}",
                self.size
            )));
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err(Error::Validation(format!(
                "order price must be within (0, 1), got {}",
                self.price
            )));
        }
        Ok(())
    }

    /// Notional value of the order.
    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

/// Order status snapshot returned by the execution provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub average_price: Option<Decimal>,
}

/// Conditional token balance held by the trading wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub token_id: String,
    pub balance: Decimal,
    pub market_id: Option<String>,
    pub outcome: Option<String>,
}
