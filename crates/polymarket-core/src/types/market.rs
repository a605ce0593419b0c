//! Market-related types for Polymarket data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Seconds in one hour, used for time-to-resolution conversions.
const SECONDS_PER_HOUR: Decimal = Decimal::from_parts(3600, 0, 0, false, 0);

/// Represents a Polymarket market (prediction market).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub condition_id: Option<String>,
    pub question: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tokens: Vec<Token>,
    /// Lifetime traded volume (USD).
    pub volume: Decimal,
    /// Volume traded over the last 24 hours (USD).
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub resolved: bool,
    pub winning_outcome: Option<String>,
}

impl Market {
    /// Hours left until the market's end date, negative once it has passed.
    pub fn hours_to_resolution(&self, now: DateTime<Utc>) -> Option<Decimal> {
        let end = self.end_date?;
        let seconds = (end - now).num_seconds();
        Some(Decimal::from(seconds) / SECONDS_PER_HOUR)
    }

    /// True for markets with exactly two outcomes.
    pub fn is_binary(&self) -> bool {
        self.tokens.len() == 2
    }

    pub fn token(&self, token_id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.token_id == token_id)
    }

    /// Whether the given outcome won.
    ///
    /// Returns `None` while the market is unresolved or no winner is published.
    /// The winner may be published either as the outcome name or as a token id.
    pub fn is_winner(&self, outcome: &str, token_id: &str) -> Option<bool> {
        if !self.resolved {
            return None;
        }
        let winner = self.winning_outcome.as_deref()?;
        Some(winner.eq_ignore_ascii_case(outcome) || winner == token_id)
    }
}

/// A single outcome (e.g., YES or NO) within a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub token_id: String,
    pub market_id: String,
    pub outcome: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub mid_price: Option<Decimal>,
    pub volume_24h: Decimal,
}

/// Real-time order book data for a market outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub market_id: String,
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Returns the best bid level (highest buy order).
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.iter().max_by(|a, b| a.price.cmp(&b.price))
    }

    /// Returns the best ask level (lowest sell order).
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.iter().min_by(|a, b| a.price.cmp(&b.price))
    }
}

/// A single price level in the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Top-of-book snapshot for one outcome token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub token_id: String,
    pub outcome: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub mid_price: Decimal,
    pub spread: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceQuote {
    /// Build a quote from an order book.
    ///
    /// Returns `None` unless both sides of the book have liquidity.
    pub fn from_book(outcome: &str, book: &OrderBook) -> Option<Self> {
        let bid = book.best_bid()?;
        let ask = book.best_ask()?;
        Some(Self {
            token_id: book.token_id.clone(),
            outcome: outcome.to_string(),
            best_bid: bid.price,
            best_ask: ask.price,
            mid_price: (bid.price + ask.price) / Decimal::TWO,
            spread: ask.price - bid.price,
            bid_size: bid.size,
            ask_size: ask.size,
            timestamp: book.timestamp,
        })
    }

    /// Spread relative to the mid-price, `None` when the mid-price is zero.
    pub fn spread_ratio(&self) -> Option<Decimal> {
        self.spread.checked_div(self.mid_price)
    }
}
