//! Engine crate: the supervisor loops, performance tracking, and state
//! persistence for the funding-rate arbitrage bot.

pub mod engine;
pub mod performance;
pub mod state;

pub use engine::FundingEngine;
pub use performance::{PerformanceStats, PerformanceTracker, DAILY_RETURN_WINDOW};
pub use state::{StateError, StateStore};
