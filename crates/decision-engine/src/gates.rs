//! Static gate catalogue (G1..G10) and the shared gate evaluation contract.

use analysis_core::Instrument;
use multi_timeframe::{AnalysisResult, TimeframeAnalysis};

use crate::config::{EngineConfig, GateThresholds};
use crate::dynamic_gates::DynamicGate;
use crate::models::{GateKind, GateResult, GateSeverity, TradeProposal};

/// Everything a gate may look at besides the proposal.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub analysis_available: bool,
    pub readiness_reason: Option<&'a str>,
    pub instrument: Option<&'a Instrument>,
    pub analysis: Option<&'a AnalysisResult>,
    pub primary: Option<&'a TimeframeAnalysis>,
    pub spread_pips: Option<f64>,
}

impl GateContext<'_> {
    fn primary_atr_pips(&self) -> Option<f64> {
        if !self.analysis_available {
            return None;
        }
        match (self.primary, self.instrument) {
            (Some(p), Some(inst)) => Some(inst.price_to_pips(p.atr)),
            _ => None,
        }
    }
}

/// Gates compiled into the engine, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticGate {
    MinWinProbability,
    RewardRisk,
    ExpectedValue,
    VolatilityFloor,
    VolatilityCeiling,
    TrendConflict,
    TimeframeDisagreement,
    StopInsideNoise,
    SpreadCost,
    AnalysisUnavailable,
}

const SKIPPED: &str = "skipped: analysis unavailable";

impl StaticGate {
    pub const CATALOGUE: [StaticGate; 10] = [
        StaticGate::MinWinProbability,
        StaticGate::RewardRisk,
        StaticGate::ExpectedValue,
        StaticGate::VolatilityFloor,
        StaticGate::VolatilityCeiling,
        StaticGate::TrendConflict,
        StaticGate::TimeframeDisagreement,
        StaticGate::StopInsideNoise,
        StaticGate::SpreadCost,
        StaticGate::AnalysisUnavailable,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            StaticGate::MinWinProbability => "G1",
            StaticGate::RewardRisk => "G2",
            StaticGate::ExpectedValue => "G3",
            StaticGate::VolatilityFloor => "G4",
            StaticGate::VolatilityCeiling => "G5",
            StaticGate::TrendConflict => "G6",
            StaticGate::TimeframeDisagreement => "G7",
            StaticGate::StopInsideNoise => "G8",
            StaticGate::SpreadCost => "G9",
            StaticGate::AnalysisUnavailable => "G10",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StaticGate::MinWinProbability => "Minimum Win Probability",
            StaticGate::RewardRisk => "Reward/Risk Ratio",
            StaticGate::ExpectedValue => "Negative Expected Value",
            StaticGate::VolatilityFloor => "Volatility Floor",
            StaticGate::VolatilityCeiling => "Volatility Ceiling",
            StaticGate::TrendConflict => "Trend Conflict",
            StaticGate::TimeframeDisagreement => "Timeframe Disagreement",
            StaticGate::StopInsideNoise => "Stop Inside Noise",
            StaticGate::SpreadCost => "Spread Cost",
            StaticGate::AnalysisUnavailable => "Analysis Unavailable",
        }
    }

    pub fn from_id(id: &str) -> Option<StaticGate> {
        Self::CATALOGUE.iter().copied().find(|g| g.id() == id)
    }

    /// Pure verdict: `(triggered, message)`.
    pub fn check(
        &self,
        proposal: &TradeProposal,
        ctx: &GateContext<'_>,
        t: &GateThresholds,
    ) -> (bool, String) {
        match self {
            StaticGate::MinWinProbability => {
                let p = proposal.base_win_probability;
                let triggered = p < t.min_win_probability;
                (
                    triggered,
                    format!(
                        "win probability {:.2} {} minimum {:.2}",
                        p,
                        if triggered { "below" } else { "meets" },
                        t.min_win_probability
                    ),
                )
            }
            StaticGate::RewardRisk => {
                let rr = proposal.reward_risk();
                let triggered = rr < t.min_reward_risk;
                (
                    triggered,
                    format!(
                        "reward/risk {:.2} {} minimum {:.2}",
                        rr,
                        if triggered { "below" } else { "meets" },
                        t.min_reward_risk
                    ),
                )
            }
            StaticGate::ExpectedValue => {
                let ev = proposal.expected_value_pips();
                let triggered = ev <= t.min_expected_value_pips;
                (
                    triggered,
                    format!(
                        "expected value {:+.2} pips {} {:.2}",
                        ev,
                        if triggered { "not above" } else { "above" },
                        t.min_expected_value_pips
                    ),
                )
            }
            StaticGate::VolatilityFloor => match ctx.primary_atr_pips() {
                None => (false, SKIPPED.to_string()),
                Some(atr) => {
                    let triggered = atr < t.min_atr_pips;
                    (
                        triggered,
                        format!(
                            "primary ATR {:.1} pips {} floor {:.1}",
                            atr,
                            if triggered { "below" } else { "above" },
                            t.min_atr_pips
                        ),
                    )
                }
            },
            StaticGate::VolatilityCeiling => match ctx.primary_atr_pips() {
                None => (false, SKIPPED.to_string()),
                Some(atr) => {
                    let triggered = atr > t.max_atr_pips;
                    (
                        triggered,
                        format!(
                            "primary ATR {:.1} pips {} ceiling {:.1}",
                            atr,
                            if triggered { "above" } else { "within" },
                            t.max_atr_pips
                        ),
                    )
                }
            },
            StaticGate::TrendConflict => match ctx.analysis.filter(|_| ctx.analysis_available) {
                None => (false, SKIPPED.to_string()),
                Some(analysis) => {
                    let alignment = analysis.aggregated_score * proposal.direction.sign();
                    let triggered = alignment < -t.trend_conflict_threshold;
                    (
                        triggered,
                        format!(
                            "aggregated trend {:+.2} for {} ({})",
                            analysis.aggregated_score,
                            proposal.direction,
                            if triggered { "opposes" } else { "no conflict" }
                        ),
                    )
                }
            },
            StaticGate::TimeframeDisagreement => {
                let pair = ctx
                    .analysis
                    .filter(|_| ctx.analysis_available)
                    .and_then(|a| Some((ctx.primary?, a.longest()?)));
                match pair {
                    None => (false, SKIPPED.to_string()),
                    Some((primary, longest)) if primary.timeframe == longest.timeframe => (
                        false,
                        format!("primary {} is the longest timeframe", primary.timeframe),
                    ),
                    Some((primary, longest)) => {
                        let (sp, sl) = (primary.directional_score, longest.directional_score);
                        let thr = t.timeframe_disagreement_threshold;
                        let triggered = sp * sl < 0.0 && sp.abs() >= thr && sl.abs() >= thr;
                        (
                            triggered,
                            format!(
                                "{} score {:+.2} vs {} score {:+.2}{}",
                                primary.timeframe,
                                sp,
                                longest.timeframe,
                                sl,
                                if triggered { " disagree" } else { "" }
                            ),
                        )
                    }
                }
            }
            StaticGate::StopInsideNoise => match ctx.primary_atr_pips() {
                None => (false, SKIPPED.to_string()),
                Some(atr) => {
                    let stop = proposal.max_loss_pips();
                    let min_stop = atr * t.stop_noise_fraction;
                    let triggered = stop < min_stop;
                    (
                        triggered,
                        format!(
                            "stop {:.1} pips {} noise floor {:.1} pips",
                            stop,
                            if triggered { "inside" } else { "outside" },
                            min_stop
                        ),
                    )
                }
            },
            StaticGate::SpreadCost => match ctx.spread_pips {
                None => (false, "no spread supplied".to_string()),
                Some(spread) => {
                    let limit = proposal.mean_win_pips() * t.max_spread_fraction;
                    let triggered = !spread.is_finite() || spread > limit;
                    (
                        triggered,
                        format!(
                            "spread {:.1} pips {} limit {:.1}",
                            spread,
                            if triggered { "exceeds" } else { "within" },
                            limit
                        ),
                    )
                }
            },
            StaticGate::AnalysisUnavailable => {
                if ctx.analysis_available {
                    (false, "analysis available".to_string())
                } else {
                    (
                        true,
                        format!(
                            "analysis unavailable: {}",
                            ctx.readiness_reason.unwrap_or("unknown reason")
                        ),
                    )
                }
            }
        }
    }
}

/// A gate of either kind, evaluated through one contract.
#[derive(Debug, Clone)]
pub enum Gate {
    Static(StaticGate),
    Dynamic(DynamicGate),
}

impl Gate {
    pub fn id(&self) -> &str {
        match self {
            Gate::Static(g) => g.id(),
            Gate::Dynamic(g) => &g.gate_id,
        }
    }

    pub fn evaluate(
        &self,
        proposal: &TradeProposal,
        ctx: &GateContext<'_>,
        config: &EngineConfig,
    ) -> GateResult {
        match self {
            Gate::Static(gate) => {
                let (triggered, message) = gate.check(proposal, ctx, &config.thresholds);
                GateResult {
                    gate_id: gate.id().to_string(),
                    name: gate.name().to_string(),
                    message,
                    triggered,
                    severity: if config.is_advisory(gate.id()) {
                        GateSeverity::Advisory
                    } else {
                        GateSeverity::Blocking
                    },
                    kind: GateKind::Static,
                }
            }
            Gate::Dynamic(gate) => {
                let (triggered, message) = gate.check(proposal);
                GateResult {
                    gate_id: gate.gate_id.clone(),
                    name: "Dynamic Gate".to_string(),
                    message,
                    triggered,
                    severity: gate.severity,
                    kind: GateKind::Dynamic,
                }
            }
        }
    }
}
