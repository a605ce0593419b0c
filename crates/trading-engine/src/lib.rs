//! Trading Engine
//!
//! The autonomous trading loop: scan strategies, risk-check candidates,
//! execute orders, then monitor fills, stop-losses and resolutions.

pub mod engine;
pub mod executor;
pub mod monitor;
pub mod paper;

pub use engine::{EngineState, EngineStatus, TradingEngine};
pub use executor::{ExecutionMetrics, OrderExecutor};
pub use paper::PaperExchange;
