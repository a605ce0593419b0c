//! Endgame Bot: autonomous prediction-market trading controller
//!
//! This is the root crate that provides benchmark and integration test access
//! to the internal crates:
//!
//! - `polymarket-core`: Core types, provider contracts, API client, trade store
//! - `risk-manager`: Risk assessment, dynamic limits, emergency shutdown
//! - `opportunity-scanner`: Endgame, cross-platform and intra-market strategies
//! - `trading-engine`: Trading loop, order execution, monitoring, paper exchange
//! - `trader`: Process entry point

// Re-export for benchmarks
pub use opportunity_scanner as scanner;
pub use polymarket_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
