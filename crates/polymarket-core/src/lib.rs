//! Polymarket Core Library
//!
//! Shared types, provider contracts, the Polymarket HTTP client and the trade
//! repository used by the risk manager, the opportunity scanner and the
//! trading engine.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod rate_limit;
pub mod types;

pub use error::{Error, Result};
pub use providers::{ExecutionProvider, ExternalMarketProvider, MarketDataProvider};
pub use rate_limit::RateLimiter;
