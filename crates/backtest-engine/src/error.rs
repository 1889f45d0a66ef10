use thiserror::Error;

use decision_engine::DecisionError;
use shadow_orders::SplitError;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid backtest config: {0}")]
    InvalidConfig(String),

    #[error("Decision engine error: {0}")]
    Decision(#[from] DecisionError),

    #[error("Shadow split error: {0}")]
    Split(#[from] SplitError),

    #[error("Storage error: {0}")]
    Storage(String),
}
