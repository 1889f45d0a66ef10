//! Pre-flight check that enough analysis exists for a pair before a decision.

use std::sync::Arc;

use analysis_core::{AnalysisError, Instrument, TickerResolver, Timeframe};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AnalysisResult, MultiTimeframeAnalyzer};

pub const REASON_TICKER_NOT_RESOLVED: &str = "ticker not resolved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResult {
    pub pair_display: String,
    pub ticker_found: bool,
    pub analysis_available: bool,
    pub blocking_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub results: Vec<ReadinessResult>,
}

impl ReadinessReport {
    pub fn all_ready(&self) -> bool {
        self.results.iter().all(|r| r.analysis_available)
    }

    /// Pairs that cannot be decided on, with their reasons.
    pub fn blocked(&self) -> impl Iterator<Item = &ReadinessResult> {
        self.results.iter().filter(|r| !r.analysis_available)
    }
}

/// Readiness verdict plus whatever was computed on the way, so callers
/// don't analyse twice.
#[derive(Debug, Clone)]
pub struct ReadinessAssessment {
    pub result: ReadinessResult,
    pub instrument: Option<Instrument>,
    pub analysis: Option<AnalysisResult>,
}

pub struct ReadinessChecker {
    resolver: TickerResolver,
    analyzer: Arc<MultiTimeframeAnalyzer>,
}

impl ReadinessChecker {
    pub fn new(resolver: TickerResolver, analyzer: Arc<MultiTimeframeAnalyzer>) -> Self {
        Self { resolver, analyzer }
    }

    pub fn resolver(&self) -> &TickerResolver {
        &self.resolver
    }

    pub fn analyzer(&self) -> &MultiTimeframeAnalyzer {
        &self.analyzer
    }

    /// Assess a single pair. Side-effect free.
    pub fn assess(
        &self,
        pair: &str,
        timeframes: &[Timeframe],
        as_of: DateTime<Utc>,
    ) -> ReadinessAssessment {
        let resolved = self.resolver.resolve(pair);
        let pair_display = self
            .resolver
            .to_display(pair)
            .unwrap_or_else(|_| pair.to_string());

        let instrument = match resolved {
            Ok(Some(instrument)) => instrument,
            Ok(None) => return Self::not_found(pair_display, REASON_TICKER_NOT_RESOLVED.to_string()),
            Err(AnalysisError::InvalidPairFormat(_)) => {
                return Self::not_found(pair_display, "invalid pair format".to_string())
            }
            Err(e) => return Self::not_found(pair_display, e.to_string()),
        };

        if timeframes.is_empty() {
            return ReadinessAssessment {
                result: ReadinessResult {
                    pair_display,
                    ticker_found: true,
                    analysis_available: false,
                    blocking_reason: Some("no timeframes requested".to_string()),
                },
                instrument: Some(instrument),
                analysis: None,
            };
        }

        let analysis = self.analyzer.analyze(&instrument, timeframes, as_of);
        let blocking_reason = analysis.first_unavailable().map(|(_, r)| r.to_string());
        let analysis_available = blocking_reason.is_none();

        if let Some(reason) = &blocking_reason {
            debug!("{} not ready: {}", instrument.canonical, reason);
        }

        ReadinessAssessment {
            result: ReadinessResult {
                pair_display,
                ticker_found: true,
                analysis_available,
                blocking_reason,
            },
            instrument: Some(instrument),
            analysis: Some(analysis),
        }
    }

    /// Readiness for several pairs as of now.
    pub fn check_readiness(&self, pairs: &[String], timeframes: &[Timeframe]) -> ReadinessReport {
        self.check_readiness_at(pairs, timeframes, Utc::now())
    }

    /// Readiness for several pairs at a fixed time. Pairs are checked in
    /// parallel; results keep the input order.
    pub fn check_readiness_at(
        &self,
        pairs: &[String],
        timeframes: &[Timeframe],
        as_of: DateTime<Utc>,
    ) -> ReadinessReport {
        let results = pairs
            .par_iter()
            .map(|pair| self.assess(pair, timeframes, as_of).result)
            .collect();
        ReadinessReport { results }
    }

    fn not_found(pair_display: String, reason: String) -> ReadinessAssessment {
        ReadinessAssessment {
            result: ReadinessResult {
                pair_display,
                ticker_found: false,
                analysis_available: false,
                blocking_reason: Some(reason),
            },
            instrument: None,
            analysis: None,
        }
    }
}
