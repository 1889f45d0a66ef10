use analysis_core::Direction;

use crate::config::ScoringWeights;
use crate::models::{GateResult, GateSeverity};

/// Penalty units beyond which the score stops falling. Keeps the score
/// bounded however many dynamic gates pile up.
pub const MAX_PENALTY_UNITS: f64 = 10.0;

/// Composite score in `[-scale * MAX_PENALTY_UNITS, scale]`.
///
/// Base term blends the win probability (centred on 0.5) with how well the
/// aggregated trend agrees with the proposal's direction. Every triggered
/// gate subtracts a non-negative penalty, so adding a triggered gate never
/// raises the score.
#[derive(Debug, Clone)]
pub struct CompositeScorer {
    weights: ScoringWeights,
}

impl CompositeScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Unscaled base term in `[-1, 1]`.
    pub fn base(
        &self,
        win_probability: f64,
        direction: Direction,
        aggregated_score: Option<f64>,
    ) -> f64 {
        let w = &self.weights;
        let total = w.probability_weight + w.analysis_weight;
        if total <= 0.0 {
            return 0.0;
        }
        let p = if win_probability.is_finite() {
            win_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let alignment = aggregated_score
            .filter(|s| s.is_finite())
            .map(|s| (s * direction.sign()).clamp(-1.0, 1.0))
            .unwrap_or(0.0);
        (w.probability_weight * (2.0 * p - 1.0) + w.analysis_weight * alignment) / total
    }

    pub fn penalty(&self, gates: &[GateResult]) -> f64 {
        gates
            .iter()
            .filter(|g| g.triggered)
            .map(|g| match g.severity {
                GateSeverity::Blocking => self.weights.gate_penalty,
                GateSeverity::Advisory => self.weights.advisory_penalty,
            })
            .sum()
    }

    pub fn score(
        &self,
        win_probability: f64,
        direction: Direction,
        aggregated_score: Option<f64>,
        gates: &[GateResult],
    ) -> f64 {
        let raw = self.base(win_probability, direction, aggregated_score) - self.penalty(gates);
        let scale = self.weights.scale;
        (scale * raw).clamp(-scale * MAX_PENALTY_UNITS, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GateKind;
    use proptest::prelude::*;

    fn gate(id: usize, triggered: bool, severity: GateSeverity) -> GateResult {
        GateResult {
            gate_id: format!("DG-{id:04}-EUR_USD"),
            name: "Dynamic Gate".to_string(),
            message: String::new(),
            triggered,
            severity,
            kind: GateKind::Dynamic,
        }
    }

    #[test]
    fn base_rewards_alignment() {
        let s = CompositeScorer::new(ScoringWeights::default());
        let with = s.base(0.58, Direction::Long, Some(0.8));
        let against = s.base(0.58, Direction::Short, Some(0.8));
        let none = s.base(0.58, Direction::Long, None);
        assert!(with > none && none > against);
    }

    #[test]
    fn nan_inputs_stay_finite() {
        let s = CompositeScorer::new(ScoringWeights::default());
        let score = s.score(f64::NAN, Direction::Long, Some(f64::NAN), &[]);
        assert!(score.is_finite());
    }

    #[test]
    fn untriggered_gates_cost_nothing() {
        let s = CompositeScorer::new(ScoringWeights::default());
        let gates = vec![gate(1, false, GateSeverity::Blocking); 5];
        assert_eq!(
            s.score(0.6, Direction::Long, Some(0.2), &gates),
            s.score(0.6, Direction::Long, Some(0.2), &[])
        );
    }

    proptest! {
        #[test]
        fn score_never_rises_with_more_triggered_gates(
            p in 0.0f64..=1.0,
            agg in -1.0f64..=1.0,
            long in any::<bool>(),
            severities in proptest::collection::vec(any::<bool>(), 0..40),
        ) {
            let s = CompositeScorer::new(ScoringWeights::default());
            let direction = if long { Direction::Long } else { Direction::Short };
            let mut gates = Vec::new();
            let mut previous = s.score(p, direction, Some(agg), &gates);
            prop_assert!(previous.is_finite());
            for (i, blocking) in severities.into_iter().enumerate() {
                let severity = if blocking { GateSeverity::Blocking } else { GateSeverity::Advisory };
                gates.push(gate(i, true, severity));
                let next = s.score(p, direction, Some(agg), &gates);
                prop_assert!(next.is_finite());
                prop_assert!(next <= previous);
                previous = next;
            }
        }
    }
}
