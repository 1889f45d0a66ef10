//! Splits an admitted order into a primary leg plus shadow legs on
//! correlated pairs, and tracks each leg's fill status.
//!
//! Sizing only. Placing the orders is up to the caller.

use std::collections::BTreeMap;

use analysis_core::{parse_pair, Direction, MAJOR_PAIRS};
use decision_engine::DecisionResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("Decision {0} was not admitted")]
    NotAdmitted(u64),

    #[error("Requested size must be at least one unit")]
    ZeroUnits,

    #[error("Shadow fraction {fraction} for {pair} outside (0, 1)")]
    InvalidFraction { pair: String, fraction: f64 },

    #[error("Shadow fractions for {pair} sum to {total}, must stay below 1")]
    FractionsTooLarge { pair: String, total: f64 },

    #[error("Invalid shadow pair {0}")]
    InvalidPair(String),

    #[error("Unknown leg {0}")]
    UnknownLeg(String),

    #[error("Leg {leg_id} is already {status:?}")]
    LegClosed { leg_id: String, status: LegStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegRelation {
    /// Shadow trades in the primary's direction
    Same,
    /// Shadow trades against it
    Inverse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowLegSpec {
    pub pair: String,
    pub fraction: f64,
    pub relation: LegRelation,
}

impl ShadowLegSpec {
    pub fn new(pair: &str, fraction: f64, relation: LegRelation) -> Self {
        Self {
            pair: pair.to_string(),
            fraction,
            relation,
        }
    }
}

/// Shadow legs per primary pair, keyed by canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationTable {
    entries: BTreeMap<String, Vec<ShadowLegSpec>>,
}

impl Default for CorrelationTable {
    /// Common correlations among the majors.
    fn default() -> Self {
        let [eur_usd, gbp_usd, usd_jpy, usd_chf, aud_usd, usd_cad, nzd_usd, _] = MAJOR_PAIRS;
        Self::empty()
            .with(
                eur_usd,
                vec![
                    ShadowLegSpec::new(gbp_usd, 0.20, LegRelation::Same),
                    ShadowLegSpec::new(usd_chf, 0.10, LegRelation::Inverse),
                ],
            )
            .with(gbp_usd, vec![ShadowLegSpec::new(eur_usd, 0.20, LegRelation::Same)])
            .with(aud_usd, vec![ShadowLegSpec::new(nzd_usd, 0.25, LegRelation::Same)])
            .with(nzd_usd, vec![ShadowLegSpec::new(aud_usd, 0.25, LegRelation::Same)])
            .with(usd_chf, vec![ShadowLegSpec::new(eur_usd, 0.10, LegRelation::Inverse)])
            .with(usd_cad, vec![ShadowLegSpec::new(usd_jpy, 0.10, LegRelation::Same)])
    }
}

impl CorrelationTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, pair: &str, shadows: Vec<ShadowLegSpec>) -> Self {
        self.entries.insert(pair.to_string(), shadows);
        self
    }

    pub fn shadows_for(&self, pair: &str) -> &[ShadowLegSpec] {
        self.entries.get(pair).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn validate(&self) -> Result<(), SplitError> {
        for (pair, shadows) in &self.entries {
            check_canonical(pair)?;
            let mut total = 0.0;
            for spec in shadows {
                check_canonical(&spec.pair)?;
                if spec.pair == *pair {
                    return Err(SplitError::InvalidPair(spec.pair.clone()));
                }
                if !(spec.fraction > 0.0 && spec.fraction < 1.0) {
                    return Err(SplitError::InvalidFraction {
                        pair: spec.pair.clone(),
                        fraction: spec.fraction,
                    });
                }
                total += spec.fraction;
            }
            if total >= 1.0 {
                return Err(SplitError::FractionsTooLarge {
                    pair: pair.clone(),
                    total,
                });
            }
        }
        Ok(())
    }
}

fn check_canonical(pair: &str) -> Result<(), SplitError> {
    match parse_pair(pair) {
        Ok((base, quote)) if format!("{base}_{quote}") == pair => Ok(()),
        _ => Err(SplitError::InvalidPair(pair.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegStatus {
    #[default]
    Pending,
    Filled,
    /// Stood in for a fill in a backtest
    Simulated,
    Rejected,
    Cancelled,
}

impl LegStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LegStatus::Pending)
    }

    pub fn counts_as_filled(&self) -> bool {
        matches!(self, LegStatus::Filled | LegStatus::Simulated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegRole {
    Primary,
    Shadow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLeg {
    pub leg_id: String,
    pub role: LegRole,
    pub pair: String,
    pub direction: Direction,
    pub units: u64,
    pub status: LegStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowOrderPlan {
    pub proposal_index: u64,
    pub total_units: u64,
    /// Primary first, then shadows in table order
    pub legs: Vec<OrderLeg>,
}

impl ShadowOrderPlan {
    pub fn primary(&self) -> Option<&OrderLeg> {
        self.legs.iter().find(|l| l.role == LegRole::Primary)
    }

    pub fn shadows(&self) -> impl Iterator<Item = &OrderLeg> {
        self.legs.iter().filter(|l| l.role == LegRole::Shadow)
    }

    pub fn allocated_units(&self) -> u64 {
        self.legs.iter().map(|l| l.units).sum()
    }

    /// True iff every leg is filled or simulated.
    pub fn all_filled(&self) -> bool {
        self.legs.iter().all(|l| l.status.counts_as_filled())
    }

    /// Move a pending leg to `status`. Terminal legs don't change.
    pub fn mark(&mut self, leg_id: &str, status: LegStatus) -> Result<(), SplitError> {
        let leg = self
            .legs
            .iter_mut()
            .find(|l| l.leg_id == leg_id)
            .ok_or_else(|| SplitError::UnknownLeg(leg_id.to_string()))?;
        if leg.status.is_terminal() {
            return Err(SplitError::LegClosed {
                leg_id: leg_id.to_string(),
                status: leg.status,
            });
        }
        leg.status = status;
        Ok(())
    }

    /// Set every still-pending leg to `status`.
    pub fn mark_pending(&mut self, status: LegStatus) {
        for leg in self.legs.iter_mut().filter(|l| !l.status.is_terminal()) {
            leg.status = status;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShadowOrderSplitter {
    table: CorrelationTable,
}

impl ShadowOrderSplitter {
    pub fn new(table: CorrelationTable) -> Result<Self, SplitError> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Split an admitted decision into legs.
    pub fn split(
        &self,
        decision: &DecisionResult,
        total_units: u64,
    ) -> Result<ShadowOrderPlan, SplitError> {
        if !decision.admitted {
            return Err(SplitError::NotAdmitted(decision.proposal_index));
        }
        let legs = self.split_units(
            decision.proposal_index,
            &decision.pair,
            decision.direction,
            total_units,
        )?;
        debug!(
            "split #{} {} units on {} into {} legs",
            decision.proposal_index,
            total_units,
            decision.pair,
            legs.len()
        );
        Ok(ShadowOrderPlan {
            proposal_index: decision.proposal_index,
            total_units,
            legs,
        })
    }

    /// Shadow legs get `floor(total * fraction)`; whatever is left, including
    /// every rounding remainder, goes to the primary.
    pub fn split_units(
        &self,
        index: u64,
        pair: &str,
        direction: Direction,
        total_units: u64,
    ) -> Result<Vec<OrderLeg>, SplitError> {
        if total_units == 0 {
            return Err(SplitError::ZeroUnits);
        }

        let mut remaining = total_units;
        let mut shadows = Vec::new();
        for (i, spec) in self.table.shadows_for(pair).iter().enumerate() {
            let units = ((total_units as f64 * spec.fraction).floor() as u64).min(remaining);
            remaining -= units;
            shadows.push(OrderLeg {
                leg_id: format!("{index}-S{}", i + 1),
                role: LegRole::Shadow,
                pair: spec.pair.clone(),
                direction: match spec.relation {
                    LegRelation::Same => direction,
                    LegRelation::Inverse => direction.opposite(),
                },
                units,
                status: LegStatus::Pending,
            });
        }

        let mut legs = Vec::with_capacity(shadows.len() + 1);
        legs.push(OrderLeg {
            leg_id: format!("{index}-P"),
            role: LegRole::Primary,
            pair: pair.to_string(),
            direction,
            units: remaining,
            status: LegStatus::Pending,
        });
        legs.extend(shadows);
        Ok(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::Timeframe;
    use chrono::{TimeZone, Utc};
    use decision_engine::ContextSnapshot;
    use proptest::prelude::*;

    fn decision(pair: &str, admitted: bool) -> DecisionResult {
        DecisionResult {
            proposal_index: 42,
            pair: pair.to_string(),
            direction: Direction::Long,
            composite_score: 12.5,
            gate_results: Vec::new(),
            context: ContextSnapshot {
                analysis_available: true,
                pair_display: pair.replace('_', "/"),
                ticker_found: true,
                readiness_reason: None,
                as_of: Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap(),
                primary_timeframe: Timeframe::Min15,
                timeframes: Timeframe::default_stack(),
                primary_atr_pips: Some(6.0),
                aggregated_score: Some(0.4),
                timeframe_scores: Default::default(),
                spread_pips: None,
                active_dynamic_gates: 0,
                applicable_dynamic_gates: 0,
                tags: serde_json::Value::Null,
            },
            admitted,
        }
    }

    #[test]
    fn remainder_goes_to_primary() {
        let splitter = ShadowOrderSplitter::new(CorrelationTable::default()).unwrap();
        let plan = splitter.split(&decision("EUR_USD", true), 1001).unwrap();

        let units: Vec<u64> = plan.legs.iter().map(|l| l.units).collect();
        // 20% and 10% floored, 701 left for the primary
        assert_eq!(units, [701, 200, 100]);
        assert_eq!(plan.allocated_units(), 1001);

        let chf = &plan.legs[2];
        assert_eq!(chf.pair, "USD_CHF");
        assert_eq!(chf.direction, Direction::Short);
        assert_eq!(plan.primary().unwrap().leg_id, "42-P");
    }

    #[test]
    fn uncorrelated_pair_is_single_leg() {
        let splitter = ShadowOrderSplitter::new(CorrelationTable::default()).unwrap();
        let plan = splitter.split(&decision("EUR_GBP", true), 500).unwrap();
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.legs[0].units, 500);
        assert_eq!(plan.shadows().count(), 0);
    }

    #[test]
    fn rejects_unadmitted_and_empty_orders() {
        let splitter = ShadowOrderSplitter::new(CorrelationTable::default()).unwrap();
        assert_eq!(
            splitter.split(&decision("EUR_USD", false), 1000),
            Err(SplitError::NotAdmitted(42))
        );
        assert_eq!(
            splitter.split(&decision("EUR_USD", true), 0),
            Err(SplitError::ZeroUnits)
        );
    }

    #[test]
    fn invalid_tables_fail_fast() {
        let too_big = CorrelationTable::empty().with(
            "EUR_USD",
            vec![
                ShadowLegSpec::new("GBP_USD", 0.6, LegRelation::Same),
                ShadowLegSpec::new("USD_CHF", 0.5, LegRelation::Inverse),
            ],
        );
        assert!(matches!(
            ShadowOrderSplitter::new(too_big),
            Err(SplitError::FractionsTooLarge { .. })
        ));

        let zero = CorrelationTable::empty()
            .with("EUR_USD", vec![ShadowLegSpec::new("GBP_USD", 0.0, LegRelation::Same)]);
        assert!(matches!(
            ShadowOrderSplitter::new(zero),
            Err(SplitError::InvalidFraction { .. })
        ));

        let itself = CorrelationTable::empty()
            .with("EUR_USD", vec![ShadowLegSpec::new("EUR_USD", 0.1, LegRelation::Same)]);
        assert!(ShadowOrderSplitter::new(itself).is_err());
    }

    #[test]
    fn fill_tracking() {
        let splitter = ShadowOrderSplitter::new(CorrelationTable::default()).unwrap();
        let mut plan = splitter.split(&decision("EUR_USD", true), 1000).unwrap();
        assert!(!plan.all_filled());

        plan.mark("42-P", LegStatus::Filled).unwrap();
        plan.mark("42-S1", LegStatus::Simulated).unwrap();
        assert!(!plan.all_filled());
        plan.mark("42-S2", LegStatus::Filled).unwrap();
        assert!(plan.all_filled());

        assert!(matches!(
            plan.mark("42-P", LegStatus::Cancelled),
            Err(SplitError::LegClosed { .. })
        ));
        assert_eq!(
            plan.mark("42-S9", LegStatus::Filled),
            Err(SplitError::UnknownLeg("42-S9".to_string()))
        );
    }

    #[test]
    fn rejected_leg_is_not_filled() {
        let splitter = ShadowOrderSplitter::new(CorrelationTable::default()).unwrap();
        let mut plan = splitter.split(&decision("AUD_USD", true), 400).unwrap();
        plan.mark("42-S1", LegStatus::Rejected).unwrap();
        plan.mark_pending(LegStatus::Simulated);
        assert!(!plan.all_filled());
        assert_eq!(plan.legs[0].status, LegStatus::Simulated);
    }

    #[test]
    fn table_round_trips_as_plain_map() {
        let json = serde_json::to_value(CorrelationTable::default()).unwrap();
        assert_eq!(json["EUR_USD"][1]["relation"], "inverse");
        let back: CorrelationTable = serde_json::from_value(json).unwrap();
        assert_eq!(back.shadows_for("EUR_USD").len(), 2);
        assert_eq!(back.shadows_for("AUD_USD")[0].pair, "NZD_USD");
    }

    proptest! {
        #[test]
        fn units_are_conserved(
            total in 1u64..10_000_000,
            fractions in proptest::collection::vec(0.001f64..0.3, 0..3),
        ) {
            let shadow_pairs = ["GBP_USD", "USD_CHF", "AUD_USD"];
            let specs = fractions
                .iter()
                .zip(shadow_pairs)
                .map(|(&f, p)| ShadowLegSpec::new(p, f, LegRelation::Same))
                .collect();
            let splitter = ShadowOrderSplitter::new(CorrelationTable::empty().with("EUR_USD", specs)).unwrap();
            let plan = splitter.split(&decision("EUR_USD", true), total).unwrap();
            prop_assert_eq!(plan.allocated_units(), total);
            prop_assert!(plan.primary().unwrap().units > 0);
        }
    }
}
