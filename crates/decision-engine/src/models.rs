use std::collections::BTreeMap;

use analysis_core::{parse_pair, Direction, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DecisionError;

/// A proposed trade. Immutable input to a single decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeProposal {
    pub index: u64,
    pub pair: String,
    pub direction: Direction,
    /// Probability in `[0, 1]`
    pub base_win_probability: f64,
    /// Winning outcome in pips, `(min, max)`, both non-negative
    pub base_win_range: (f64, f64),
    /// Losing outcome in pips, `(min, max)`, both non-positive, e.g. `(-2, -5)`
    pub base_loss_range: (f64, f64),
}

impl TradeProposal {
    /// Reject malformed input before any gate runs. Nothing is coerced.
    pub fn validate(&self) -> Result<(), DecisionError> {
        parse_pair(&self.pair)?;

        let p = self.base_win_probability;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(DecisionError::InvalidProposal(format!(
                "base win probability {p} outside [0, 1]"
            )));
        }

        let (w0, w1) = self.base_win_range;
        if !w0.is_finite() || !w1.is_finite() || w0 < 0.0 || w1 < 0.0 {
            return Err(DecisionError::InvalidProposal(format!(
                "win range ({w0}, {w1}) must be finite and non-negative"
            )));
        }

        let (l0, l1) = self.base_loss_range;
        if !l0.is_finite() || !l1.is_finite() || l0 > 0.0 || l1 > 0.0 {
            return Err(DecisionError::InvalidProposal(format!(
                "loss range ({l0}, {l1}) must be finite and non-positive"
            )));
        }

        Ok(())
    }

    pub fn mean_win_pips(&self) -> f64 {
        (self.base_win_range.0 + self.base_win_range.1) / 2.0
    }

    /// Mean loss magnitude in pips (positive).
    pub fn mean_loss_pips(&self) -> f64 {
        (self.base_loss_range.0.abs() + self.base_loss_range.1.abs()) / 2.0
    }

    /// Widest stop in pips (positive).
    pub fn max_loss_pips(&self) -> f64 {
        self.base_loss_range.0.abs().max(self.base_loss_range.1.abs())
    }

    /// Mean win over mean loss. Infinite when the proposal risks nothing.
    pub fn reward_risk(&self) -> f64 {
        let loss = self.mean_loss_pips();
        if loss > 0.0 {
            self.mean_win_pips() / loss
        } else {
            f64::INFINITY
        }
    }

    pub fn expected_value_pips(&self) -> f64 {
        let p = self.base_win_probability;
        p * self.mean_win_pips() - (1.0 - p) * self.mean_loss_pips()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateSeverity {
    /// Triggering rejects the proposal
    #[default]
    Blocking,
    /// Recorded and penalised, but does not reject
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Static,
    Dynamic,
}

/// One gate's verdict. Kept for every evaluated gate, triggered or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate_id: String,
    pub name: String,
    pub message: String,
    pub triggered: bool,
    pub severity: GateSeverity,
    pub kind: GateKind,
}

impl GateResult {
    pub fn is_blocking(&self) -> bool {
        self.triggered && self.severity == GateSeverity::Blocking
    }
}

/// Caller-supplied context for a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraContext {
    /// Decision time; defaults to now. Backtests pass bar time here.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    /// Current spread in pips, if known
    #[serde(default)]
    pub spread_pips: Option<f64>,
    /// Overrides the engine's timeframe stack
    #[serde(default)]
    pub timeframes: Option<Vec<Timeframe>>,
    /// Opaque caller data copied into the snapshot
    #[serde(default)]
    pub tags: serde_json::Value,
}

impl ExtraContext {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of: Some(as_of),
            ..Self::default()
        }
    }

    pub fn with_spread(mut self, spread_pips: f64) -> Self {
        self.spread_pips = Some(spread_pips);
        self
    }
}

/// What the engine saw when it decided; retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub analysis_available: bool,
    pub pair_display: String,
    pub ticker_found: bool,
    pub readiness_reason: Option<String>,
    pub as_of: DateTime<Utc>,
    pub primary_timeframe: Timeframe,
    pub timeframes: Vec<Timeframe>,
    pub primary_atr_pips: Option<f64>,
    pub aggregated_score: Option<f64>,
    pub timeframe_scores: BTreeMap<Timeframe, f64>,
    pub spread_pips: Option<f64>,
    /// Live dynamic gates across the registry
    pub active_dynamic_gates: usize,
    /// Live dynamic gates that applied to this pair
    pub applicable_dynamic_gates: usize,
    #[serde(default)]
    pub tags: serde_json::Value,
}

/// Full decision for one proposal. Owned by the caller once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub proposal_index: u64,
    pub pair: String,
    pub direction: Direction,
    pub composite_score: f64,
    /// Every evaluated gate, static first in catalogue order, then dynamic
    pub gate_results: Vec<GateResult>,
    pub context: ContextSnapshot,
    pub admitted: bool,
}

impl DecisionResult {
    pub fn triggered_gates(&self) -> Vec<&GateResult> {
        self.gate_results.iter().filter(|g| g.triggered).collect()
    }

    pub fn triggered_ids(&self) -> Vec<String> {
        self.gate_results
            .iter()
            .filter(|g| g.triggered)
            .map(|g| g.gate_id.clone())
            .collect()
    }

    pub fn is_triggered(&self, gate_id: &str) -> bool {
        self.gate_results
            .iter()
            .any(|g| g.triggered && g.gate_id == gate_id)
    }

    /// Human-readable reason per triggered gate.
    pub fn rejection_reasons(&self) -> Vec<String> {
        self.gate_results
            .iter()
            .filter(|g| g.triggered)
            .map(|g| format!("{} {}: {}", g.gate_id, g.name, g.message))
            .collect()
    }
}
