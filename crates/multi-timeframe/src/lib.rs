use std::sync::Arc;

use analysis_core::{CandleSource, Instrument, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::{directional_score, latest_atr};
use tracing::debug;

pub mod readiness;

pub use readiness::{ReadinessAssessment, ReadinessChecker, ReadinessReport, ReadinessResult};

/// Indicator windows used for every timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub atr_period: usize,
    pub fast_period: usize,
    pub slow_period: usize,
    /// Bars requested from the candle source per timeframe
    pub lookback_bars: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            atr_period: 14,
            fast_period: 8,
            slow_period: 21,
            lookback_bars: 200,
        }
    }
}

impl IndicatorSettings {
    /// Candles needed before ATR and both EMAs can be formed.
    pub fn min_candles(&self) -> usize {
        (self.atr_period + 1).max(self.slow_period)
    }
}

/// How per-timeframe directional scores are combined.
///
/// Weights ramp up from the shortest to the longest timeframe by
/// `trend_bias` (trend confirmation), and the shortest timeframe gets an extra
/// `entry_timing_weight` (entry timing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationPolicy {
    pub trend_bias: f64,
    pub entry_timing_weight: f64,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            trend_bias: 1.0,
            entry_timing_weight: 0.5,
        }
    }
}

impl AggregationPolicy {
    /// Raw weight for position `index` in a short-to-long list of `count` timeframes.
    pub fn weight(&self, index: usize, count: usize) -> f64 {
        let ramp = if count > 1 {
            index as f64 / (count - 1) as f64
        } else {
            0.0
        };
        let mut w = 1.0 + self.trend_bias.max(0.0) * ramp;
        if index == 0 {
            w += self.entry_timing_weight.max(0.0);
        }
        w
    }
}

/// Indicators computed for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeAnalysis {
    pub timeframe: Timeframe,
    /// Average true range in price units, strictly positive
    pub atr: f64,
    /// Trend direction and strength in `[-1, 1]`
    pub directional_score: f64,
    pub bars_used: usize,
    pub last_close: f64,
}

/// Per-timeframe outcome. Missing data is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TimeframeOutcome {
    Available(TimeframeAnalysis),
    Unavailable { timeframe: Timeframe, reason: String },
}

impl TimeframeOutcome {
    pub fn timeframe(&self) -> Timeframe {
        match self {
            TimeframeOutcome::Available(a) => a.timeframe,
            TimeframeOutcome::Unavailable { timeframe, .. } => *timeframe,
        }
    }

    pub fn analysis(&self) -> Option<&TimeframeAnalysis> {
        match self {
            TimeframeOutcome::Available(a) => Some(a),
            TimeframeOutcome::Unavailable { .. } => None,
        }
    }
}

/// Multi-timeframe analysis for one instrument at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    /// Ordered shortest to longest
    pub timeframes: Vec<TimeframeOutcome>,
    /// Weighted combination over the available timeframes; 0.0 when none are available
    pub aggregated_score: f64,
}

impl AnalysisResult {
    /// True when every requested timeframe produced indicators.
    pub fn is_complete(&self) -> bool {
        !self.timeframes.is_empty()
            && self
                .timeframes
                .iter()
                .all(|t| matches!(t, TimeframeOutcome::Available(_)))
    }

    pub fn get(&self, timeframe: Timeframe) -> Option<&TimeframeAnalysis> {
        self.timeframes
            .iter()
            .find(|t| t.timeframe() == timeframe)
            .and_then(|t| t.analysis())
    }

    /// Longest timeframe with indicators.
    pub fn longest(&self) -> Option<&TimeframeAnalysis> {
        self.timeframes.iter().rev().find_map(|t| t.analysis())
    }

    /// First timeframe that could not be analysed, with its reason.
    pub fn first_unavailable(&self) -> Option<(Timeframe, &str)> {
        self.timeframes.iter().find_map(|t| match t {
            TimeframeOutcome::Unavailable { timeframe, reason } => Some((*timeframe, reason.as_str())),
            TimeframeOutcome::Available(_) => None,
        })
    }
}

/// Multi-timeframe analyzer
pub struct MultiTimeframeAnalyzer {
    source: Arc<dyn CandleSource>,
    settings: IndicatorSettings,
    policy: AggregationPolicy,
}

impl MultiTimeframeAnalyzer {
    pub fn new(source: Arc<dyn CandleSource>) -> Self {
        Self {
            source,
            settings: IndicatorSettings::default(),
            policy: AggregationPolicy::default(),
        }
    }

    pub fn with_settings(
        source: Arc<dyn CandleSource>,
        settings: IndicatorSettings,
        policy: AggregationPolicy,
    ) -> Self {
        Self {
            source,
            settings,
            policy,
        }
    }

    pub fn settings(&self) -> &IndicatorSettings {
        &self.settings
    }

    pub fn policy(&self) -> &AggregationPolicy {
        &self.policy
    }

    /// Compute ATR and directional score for one timeframe.
    pub fn analyze_timeframe(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
    ) -> TimeframeOutcome {
        let needed = self.settings.min_candles();
        let lookback = self.settings.lookback_bars.max(needed);

        let bars = match self
            .source
            .closed_bars(&instrument.canonical, timeframe, as_of, lookback)
        {
            Ok(bars) => bars,
            Err(e) => {
                debug!("Failed to load {} candles for {}: {}", timeframe, instrument.canonical, e);
                return TimeframeOutcome::Unavailable {
                    timeframe,
                    reason: format!("data source error on {timeframe}: {e}"),
                };
            }
        };

        if bars.len() < needed {
            return TimeframeOutcome::Unavailable {
                timeframe,
                reason: format!(
                    "insufficient data on {}: {} of {} candles",
                    timeframe,
                    bars.len(),
                    needed
                ),
            };
        }

        let atr = latest_atr(&bars, self.settings.atr_period);
        let score = directional_score(
            &bars,
            self.settings.fast_period,
            self.settings.slow_period,
            self.settings.atr_period,
        );

        match (atr, score, bars.last()) {
            (Some(atr), Some(score), Some(last)) => TimeframeOutcome::Available(TimeframeAnalysis {
                timeframe,
                atr,
                directional_score: score,
                bars_used: bars.len(),
                last_close: last.close,
            }),
            _ => TimeframeOutcome::Unavailable {
                timeframe,
                reason: format!("insufficient data on {timeframe}: ATR window not formed"),
            },
        }
    }

    /// Analyse every requested timeframe (sorted short to long, deduplicated)
    /// and aggregate the directional scores.
    pub fn analyze(
        &self,
        instrument: &Instrument,
        timeframes: &[Timeframe],
        as_of: DateTime<Utc>,
    ) -> AnalysisResult {
        let mut ordered = timeframes.to_vec();
        ordered.sort();
        ordered.dedup();

        let outcomes: Vec<TimeframeOutcome> = ordered
            .iter()
            .map(|&tf| self.analyze_timeframe(instrument, tf, as_of))
            .collect();

        let aggregated_score = self.aggregate(&outcomes);

        debug!(
            "Analysed {} on {} timeframes: aggregated={:.3}",
            instrument.canonical,
            outcomes.len(),
            aggregated_score
        );

        AnalysisResult {
            symbol: instrument.canonical.clone(),
            as_of,
            timeframes: outcomes,
            aggregated_score,
        }
    }

    /// Weighted mean of the available scores. Never NaN.
    pub fn aggregate(&self, outcomes: &[TimeframeOutcome]) -> f64 {
        let count = outcomes.len();
        let (weighted, total) = outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.analysis().map(|a| (i, a.directional_score)))
            .filter(|(_, s)| s.is_finite())
            .fold((0.0, 0.0), |(acc, w_sum), (i, s)| {
                let w = self.policy.weight(i, count);
                (acc + w * s, w_sum + w)
            });

        if total > 0.0 {
            (weighted / total).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{Bar, InMemoryCandles, TickerResolver};
    use chrono::{Duration, TimeZone};

    fn trending_bars(timeframe: Timeframe, n: usize, step: f64) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 1.1000 + step * i as f64;
                Bar {
                    timestamp: t0 + timeframe.to_duration() * i as i32,
                    open: close - step,
                    high: close + 0.0005,
                    low: close - 0.0005,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    fn analyzer_with(series: &[(Timeframe, Vec<Bar>)]) -> MultiTimeframeAnalyzer {
        let mut candles = InMemoryCandles::new();
        for (tf, bars) in series {
            candles.insert("EUR_USD", *tf, bars.clone());
        }
        MultiTimeframeAnalyzer::new(Arc::new(candles))
    }

    fn eur_usd() -> Instrument {
        TickerResolver::default().resolve("EUR_USD").unwrap().unwrap()
    }

    fn far_future() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_weights_favour_longer_timeframes_and_entry_timing() {
        let policy = AggregationPolicy::default();
        assert!(policy.weight(2, 3) > policy.weight(1, 3));
        assert_eq!(policy.weight(0, 3), 1.5);
        assert_eq!(policy.weight(0, 1), 1.5);
    }

    #[test]
    fn test_uptrend_aggregates_positive() {
        let analyzer = analyzer_with(&[
            (Timeframe::Min15, trending_bars(Timeframe::Min15, 60, 0.0002)),
            (Timeframe::Hour1, trending_bars(Timeframe::Hour1, 60, 0.0004)),
            (Timeframe::Hour4, trending_bars(Timeframe::Hour4, 60, 0.0008)),
        ]);
        let result = analyzer.analyze(&eur_usd(), &Timeframe::default_stack(), far_future());

        assert!(result.is_complete());
        assert!(result.aggregated_score > 0.0);
        for tf in Timeframe::default_stack() {
            assert!(result.get(tf).unwrap().atr > 0.0);
        }
    }

    #[test]
    fn test_zero_candles_is_unavailable_sentinel() {
        let analyzer = analyzer_with(&[(
            Timeframe::Min15,
            trending_bars(Timeframe::Min15, 60, 0.0002),
        )]);
        let result = analyzer.analyze(&eur_usd(), &Timeframe::default_stack(), far_future());

        assert!(!result.is_complete());
        let (tf, reason) = result.first_unavailable().unwrap();
        assert_eq!(tf, Timeframe::Hour1);
        assert!(reason.contains("1h"), "{reason}");
        assert!(result.aggregated_score.is_finite());
    }

    #[test]
    fn test_no_data_at_all_scores_zero() {
        let analyzer = analyzer_with(&[]);
        let result = analyzer.analyze(&eur_usd(), &Timeframe::default_stack(), far_future());
        assert_eq!(result.aggregated_score, 0.0);
        assert!(result.longest().is_none());
    }

    #[test]
    fn test_input_order_is_normalised() {
        let analyzer = analyzer_with(&[
            (Timeframe::Min15, trending_bars(Timeframe::Min15, 60, 0.0002)),
            (Timeframe::Hour4, trending_bars(Timeframe::Hour4, 60, 0.0008)),
        ]);
        let result = analyzer.analyze(
            &eur_usd(),
            &[Timeframe::Hour4, Timeframe::Min15, Timeframe::Hour4],
            far_future(),
        );
        let order: Vec<Timeframe> = result.timeframes.iter().map(|t| t.timeframe()).collect();
        assert_eq!(order, vec![Timeframe::Min15, Timeframe::Hour4]);
        assert_eq!(result.longest().unwrap().timeframe, Timeframe::Hour4);
    }

    #[test]
    fn test_analysis_serializes_with_status_tag() {
        let outcome = TimeframeOutcome::Unavailable {
            timeframe: Timeframe::Hour1,
            reason: "insufficient data on 1h: 0 of 22 candles".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "unavailable");
    }

    #[test]
    fn test_bars_after_as_of_are_ignored() {
        let bars = trending_bars(Timeframe::Min15, 60, 0.0002);
        let cutoff = bars[30].timestamp;
        let analyzer = analyzer_with(&[(Timeframe::Min15, bars)]);
        let outcome = analyzer.analyze_timeframe(&eur_usd(), Timeframe::Min15, cutoff);
        assert_eq!(outcome.analysis().unwrap().bars_used, 30);
    }
}
