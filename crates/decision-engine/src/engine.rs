//! Full decision pipeline: readiness, static gates, dynamic gates, score.

use std::collections::BTreeMap;
use std::sync::Arc;

use analysis_core::{CandleSource, TickerResolver, Timeframe};
use chrono::Utc;
use multi_timeframe::{MultiTimeframeAnalyzer, ReadinessChecker, ReadinessReport};
use rayon::prelude::*;
use tracing::debug;

use crate::config::EngineConfig;
use crate::dynamic_gates::DynamicGateSource;
use crate::gates::{Gate, GateContext, StaticGate};
use crate::models::{ContextSnapshot, DecisionResult, ExtraContext, TradeProposal};
use crate::scorer::CompositeScorer;
use crate::DecisionError;

pub struct DecisionEngine {
    config: EngineConfig,
    readiness: ReadinessChecker,
    scorer: CompositeScorer,
    registry: Arc<dyn DynamicGateSource>,
}

impl DecisionEngine {
    /// Fails fast on an invalid config.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn CandleSource>,
        registry: Arc<dyn DynamicGateSource>,
    ) -> Result<Self, DecisionError> {
        config.validate()?;

        let resolver = TickerResolver::new(config.universe.iter().map(String::as_str));
        if resolver.canonical_pairs().len() != config.universe.len() {
            return Err(DecisionError::InvalidConfig(
                "universe contains malformed or duplicate pairs".to_string(),
            ));
        }

        let analyzer = Arc::new(MultiTimeframeAnalyzer::with_settings(
            source,
            config.indicators.clone(),
            config.aggregation.clone(),
        ));
        let scorer = CompositeScorer::new(config.weights.clone());

        Ok(Self {
            readiness: ReadinessChecker::new(resolver, analyzer),
            scorer,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn DynamicGateSource> {
        &self.registry
    }

    pub fn readiness_checker(&self) -> &ReadinessChecker {
        &self.readiness
    }

    /// Readiness of every pair on the engine's timeframe stack, as of now.
    pub fn check_readiness(&self, pairs: &[String]) -> ReadinessReport {
        self.readiness.check_readiness(pairs, &self.config.timeframes)
    }

    /// Evaluate one proposal against every gate and score it.
    ///
    /// Only malformed proposals return `Err`. Missing data, unknown pairs and
    /// triggered gates all come back as a rejected `DecisionResult`.
    pub fn evaluate_full_decision(
        &self,
        proposal: &TradeProposal,
        primary_timeframe: Timeframe,
        extra: &ExtraContext,
    ) -> Result<DecisionResult, DecisionError> {
        proposal.validate()?;

        let as_of = extra.as_of.unwrap_or_else(Utc::now);

        let mut timeframes = extra
            .timeframes
            .clone()
            .unwrap_or_else(|| self.config.timeframes.clone());
        timeframes.push(primary_timeframe);
        timeframes.sort();
        timeframes.dedup();

        let assessment = self.readiness.assess(&proposal.pair, &timeframes, as_of);
        let readiness = &assessment.result;
        let analysis = assessment.analysis.as_ref();
        let primary = analysis.and_then(|a| a.get(primary_timeframe));

        let canonical = assessment
            .instrument
            .as_ref()
            .map(|i| i.canonical.clone())
            .unwrap_or_else(|| proposal.pair.clone());

        self.registry.evict_expired(as_of);
        let dynamic = self.registry.live_gates_for(&canonical, as_of);

        let ctx = GateContext {
            analysis_available: readiness.analysis_available,
            readiness_reason: readiness.blocking_reason.as_deref(),
            instrument: assessment.instrument.as_ref(),
            analysis,
            primary,
            spread_pips: extra.spread_pips,
        };

        let gates = StaticGate::CATALOGUE
            .iter()
            .map(|g| Gate::Static(*g))
            .chain(dynamic.iter().cloned().map(Gate::Dynamic));
        let gate_results: Vec<_> = gates
            .map(|g| g.evaluate(proposal, &ctx, &self.config))
            .collect();

        let aggregated_score = analysis
            .filter(|_| readiness.analysis_available)
            .map(|a| a.aggregated_score);
        let composite_score = self.scorer.score(
            proposal.base_win_probability,
            proposal.direction,
            aggregated_score,
            &gate_results,
        );
        let admitted = !gate_results.iter().any(|g| g.is_blocking());

        let timeframe_scores: BTreeMap<Timeframe, f64> = analysis
            .map(|a| {
                a.timeframes
                    .iter()
                    .filter_map(|o| o.analysis())
                    .map(|t| (t.timeframe, t.directional_score))
                    .collect()
            })
            .unwrap_or_default();

        let primary_atr_pips = match (primary, assessment.instrument.as_ref()) {
            (Some(p), Some(inst)) if readiness.analysis_available => Some(inst.price_to_pips(p.atr)),
            _ => None,
        };

        let result = DecisionResult {
            proposal_index: proposal.index,
            pair: canonical,
            direction: proposal.direction,
            composite_score,
            context: ContextSnapshot {
                analysis_available: readiness.analysis_available,
                pair_display: readiness.pair_display.clone(),
                ticker_found: readiness.ticker_found,
                readiness_reason: readiness.blocking_reason.clone(),
                as_of,
                primary_timeframe,
                timeframes,
                primary_atr_pips,
                aggregated_score,
                timeframe_scores,
                spread_pips: extra.spread_pips,
                active_dynamic_gates: self.registry.active_count(as_of),
                applicable_dynamic_gates: dynamic.len(),
                tags: extra.tags.clone(),
            },
            gate_results,
            admitted,
        };

        debug!(
            "decision #{} {} {}: score={:.2} admitted={} triggered={:?}",
            result.proposal_index,
            result.pair,
            result.direction,
            result.composite_score,
            result.admitted,
            result.triggered_ids()
        );

        Ok(result)
    }

    /// Evaluate independent proposals in parallel. Output keeps input order.
    pub fn evaluate_batch(
        &self,
        proposals: &[TradeProposal],
        primary_timeframe: Timeframe,
        extra: &ExtraContext,
    ) -> Vec<Result<DecisionResult, DecisionError>> {
        proposals
            .par_iter()
            .map(|p| self.evaluate_full_decision(p, primary_timeframe, extra))
            .collect()
    }
}

/// Best score first. Ties keep their relative order.
pub fn rank_by_score(results: &mut [DecisionResult]) {
    results.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
}
