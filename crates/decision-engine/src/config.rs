use analysis_core::{Timeframe, MAJOR_PAIRS};
use multi_timeframe::{AggregationPolicy, IndicatorSettings};
use serde::{Deserialize, Serialize};

use crate::gates::StaticGate;
use crate::DecisionError;

/// Thresholds for the static gate catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateThresholds {
    /// G1
    pub min_win_probability: f64,
    /// G2: mean win over mean loss
    pub min_reward_risk: f64,
    /// G3: expected value must exceed this many pips
    pub min_expected_value_pips: f64,
    /// G4: primary ATR floor in pips
    pub min_atr_pips: f64,
    /// G5: primary ATR ceiling in pips
    pub max_atr_pips: f64,
    /// G6: direction-adjusted aggregated score below `-x` is a conflict
    pub trend_conflict_threshold: f64,
    /// G7: both primary and longest scores must exceed this magnitude to disagree
    pub timeframe_disagreement_threshold: f64,
    /// G8: widest stop must be at least this fraction of primary ATR
    pub stop_noise_fraction: f64,
    /// G9: spread may be at most this fraction of the mean win
    pub max_spread_fraction: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_win_probability: 0.50,
            min_reward_risk: 1.0,
            min_expected_value_pips: 0.0,
            min_atr_pips: 1.0,
            max_atr_pips: 60.0,
            trend_conflict_threshold: 0.5,
            timeframe_disagreement_threshold: 0.6,
            stop_noise_fraction: 0.25,
            max_spread_fraction: 0.25,
        }
    }
}

/// Largest accepted weight. Sums and scaled penalties stay finite below it.
pub const MAX_WEIGHT: f64 = 1e6;
/// Largest accepted output scale.
pub const MAX_SCALE: f64 = 1e6;

/// Composite score weights. All must be finite and non-negative, which is
/// what keeps the score monotone in the number of triggered gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub probability_weight: f64,
    pub analysis_weight: f64,
    /// Subtracted per triggered blocking gate (in unscaled units)
    pub gate_penalty: f64,
    /// Subtracted per triggered advisory gate (in unscaled units)
    pub advisory_penalty: f64,
    /// Output scale; the score lies in `[-scale * MAX_PENALTY_UNITS, scale]`
    pub scale: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            probability_weight: 1.0,
            analysis_weight: 0.5,
            gate_penalty: 0.25,
            advisory_penalty: 0.1,
            scale: 100.0,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), DecisionError> {
        let fields = [
            ("probability_weight", self.probability_weight),
            ("analysis_weight", self.analysis_weight),
            ("gate_penalty", self.gate_penalty),
            ("advisory_penalty", self.advisory_penalty),
        ];
        for (name, value) in fields {
            if !value.is_finite() || !(0.0..=MAX_WEIGHT).contains(&value) {
                return Err(DecisionError::InvalidConfig(format!(
                    "scoring weight {name} must be in [0, {MAX_WEIGHT}], got {value}"
                )));
            }
        }
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > MAX_SCALE {
            return Err(DecisionError::InvalidConfig(format!(
                "scoring scale must be in (0, {MAX_SCALE}], got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tradable universe, canonical names
    pub universe: Vec<String>,
    /// Analysis stack, shortest first
    pub timeframes: Vec<Timeframe>,
    pub thresholds: GateThresholds,
    pub weights: ScoringWeights,
    pub indicators: IndicatorSettings,
    pub aggregation: AggregationPolicy,
    /// Static gate ids that record but do not reject
    #[serde(default)]
    pub advisory_gates: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            universe: MAJOR_PAIRS.iter().map(|p| p.to_string()).collect(),
            timeframes: Timeframe::default_stack(),
            thresholds: GateThresholds::default(),
            weights: ScoringWeights::default(),
            indicators: IndicatorSettings::default(),
            aggregation: AggregationPolicy::default(),
            advisory_gates: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), DecisionError> {
        self.weights.validate()?;

        if self.timeframes.is_empty() {
            return Err(DecisionError::InvalidConfig(
                "at least one analysis timeframe is required".to_string(),
            ));
        }

        for id in &self.advisory_gates {
            let Some(gate) = StaticGate::from_id(id) else {
                return Err(DecisionError::InvalidConfig(format!(
                    "unknown advisory gate id '{id}'"
                )));
            };
            if gate == StaticGate::AnalysisUnavailable {
                return Err(DecisionError::InvalidConfig(
                    "G10 (analysis unavailable) cannot be advisory".to_string(),
                ));
            }
        }

        let t = &self.thresholds;
        if t.min_atr_pips > t.max_atr_pips {
            return Err(DecisionError::InvalidConfig(format!(
                "ATR floor {} exceeds ceiling {}",
                t.min_atr_pips, t.max_atr_pips
            )));
        }

        Ok(())
    }

    pub fn is_advisory(&self, gate_id: &str) -> bool {
        self.advisory_gates.iter().any(|g| g == gate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_are_valid() {
        assert!(ScoringWeights::default().validate().is_ok());
    }

    #[test]
    fn oversized_scale_or_weight_is_rejected() {
        let huge_scale = ScoringWeights {
            scale: 1e308,
            ..ScoringWeights::default()
        };
        assert!(matches!(huge_scale.validate(), Err(DecisionError::InvalidConfig(_))));

        let huge_penalty = ScoringWeights {
            gate_penalty: f64::MAX,
            ..ScoringWeights::default()
        };
        assert!(huge_penalty.validate().is_err());

        let at_limit = ScoringWeights {
            scale: MAX_SCALE,
            probability_weight: MAX_WEIGHT,
            ..ScoringWeights::default()
        };
        assert!(at_limit.validate().is_ok());
    }
}
