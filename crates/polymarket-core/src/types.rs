//! Core domain types for the endgame trading system.

pub mod market;
pub mod opportunity;
pub mod order;
pub mod portfolio;
pub mod trade;

pub use market::*;
pub use opportunity::*;
pub use order::*;
pub use portfolio::*;
pub use trade::*;
