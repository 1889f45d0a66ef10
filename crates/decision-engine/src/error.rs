use thiserror::Error;

use analysis_core::AnalysisError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Invalid pair format: {0}")]
    InvalidPairFormat(String),

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),
}

impl From<AnalysisError> for DecisionError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::InvalidPairFormat(p) => DecisionError::InvalidPairFormat(p),
            other => DecisionError::InvalidProposal(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Dynamic gate {0} already exists")]
    DuplicateGate(String),

    #[error("Dynamic gate {0} expires before it is created")]
    InvalidExpiry(String),

    #[error("Invalid pair on dynamic gate {gate_id}: {pair}")]
    InvalidPair { gate_id: String, pair: String },
}
