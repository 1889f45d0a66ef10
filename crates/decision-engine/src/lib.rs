//! Trade admission: static and self-synthesized gates, composite scoring,
//! and the decision pipeline that ties them to multi-timeframe analysis.

pub mod config;
pub mod dynamic_gates;
pub mod engine;
pub mod error;
pub mod gates;
pub mod models;
pub mod scorer;
pub mod synthesis;

pub use config::{EngineConfig, GateThresholds, ScoringWeights};
pub use dynamic_gates::{
    AuditEvent, DynamicGate, DynamicGateRegistry, DynamicGateSource, GateAuditEntry, GateReason,
    RegistrySnapshot,
};
pub use engine::{rank_by_score, DecisionEngine};
pub use error::{DecisionError, RegistryError};
pub use gates::{Gate, GateContext, StaticGate};
pub use models::*;
pub use scorer::{CompositeScorer, MAX_PENALTY_UNITS};
pub use synthesis::{LossStreakSynthesizer, SynthesisPolicyConfig};
