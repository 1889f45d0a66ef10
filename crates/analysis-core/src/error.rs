use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid pair format: {0}")]
    InvalidPairFormat(String),

    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Data source error: {0}")]
    SourceError(String),
}
