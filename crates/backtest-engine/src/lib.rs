//! Historical replay of the decision pipeline, summary statistics and
//! trade persistence.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod store;
pub mod timeframe_agg;
#[cfg(test)]
mod tests;

pub use config::{BacktestConfig, SpreadModel, DEFAULT_WINDOW_DAYS};
pub use db::SqlTradeStore;
pub use engine::BacktestSimulator;
pub use error::BacktestError;
pub use metrics::BacktestSummary;
pub use models::*;
pub use store::{MemoryTradeStore, PersistOutcome, TradeStore};
