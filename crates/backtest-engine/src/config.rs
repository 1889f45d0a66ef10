use std::collections::HashSet;

use analysis_core::{parse_pair, Timeframe, MAJOR_PAIRS};
use chrono::{DateTime, Duration, Utc};
use decision_engine::{EngineConfig, SynthesisPolicyConfig};
use serde::{Deserialize, Serialize};
use shadow_orders::CorrelationTable;

use crate::BacktestError;

/// Default trailing window, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 90;

/// Execution cost model. All values in pips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadModel {
    /// Full spread; half is paid on entry and half on exit
    pub spread_pips: f64,
    /// Market fills slip by a uniform draw in `[0, max]`, always adverse
    pub max_slippage_pips: f64,
    pub seed: u64,
}

impl Default for SpreadModel {
    fn default() -> Self {
        Self {
            spread_pips: 1.0,
            max_slippage_pips: 0.3,
            seed: 42,
        }
    }
}

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub variant_id: String,
    pub pairs: Vec<String>,
    pub spread: SpreadModel,
    /// Timeframe of the supplied bars; higher timeframes are aggregated from it
    pub base_timeframe: Timeframe,
    pub primary_timeframe: Timeframe,
    /// Look for a signal every N base bars
    pub signal_interval_bars: usize,
    /// Base bars compared to pick the proposal direction
    pub momentum_lookback_bars: usize,
    /// Trades still open after this many base bars close at market
    pub max_holding_bars: usize,
    pub base_win_probability: f64,
    pub base_win_range: (f64, f64),
    pub base_loss_range: (f64, f64),
    pub units_per_trade: u64,
    /// Shadow legs to record for admitted trades; `None` records the primary only
    #[serde(default)]
    pub shadow_table: Option<CorrelationTable>,
    pub engine: EngineConfig,
    pub synthesis: SynthesisPolicyConfig,
}

impl BacktestConfig {
    /// All 8 majors over the trailing 90 days ending at `now`.
    pub fn default_for(now: DateTime<Utc>) -> Self {
        Self {
            start_date: now - Duration::days(DEFAULT_WINDOW_DAYS),
            end_date: now,
            variant_id: "baseline".to_string(),
            pairs: MAJOR_PAIRS.iter().map(|p| p.to_string()).collect(),
            spread: SpreadModel::default(),
            base_timeframe: Timeframe::Min15,
            primary_timeframe: Timeframe::Min15,
            signal_interval_bars: 4,
            momentum_lookback_bars: 8,
            max_holding_bars: 32,
            base_win_probability: 0.55,
            base_win_range: (3.0, 8.0),
            base_loss_range: (-2.0, -5.0),
            units_per_trade: 10_000,
            shadow_table: None,
            engine: EngineConfig::default(),
            synthesis: SynthesisPolicyConfig::default(),
        }
    }

    /// Checked before any simulation work starts.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.end_date <= self.start_date {
            return Err(BacktestError::InvalidConfig(format!(
                "end date {} is not after start date {}",
                self.end_date, self.start_date
            )));
        }
        if self.pairs.is_empty() {
            return Err(BacktestError::InvalidConfig("no pairs configured".to_string()));
        }
        let mut seen = HashSet::new();
        for pair in &self.pairs {
            let canonical = parse_pair(pair)
                .map(|(b, q)| format!("{b}_{q}"))
                .map_err(|e| BacktestError::InvalidConfig(e.to_string()))?;
            if canonical != *pair {
                return Err(BacktestError::InvalidConfig(format!(
                    "pair {pair} must be canonical ({canonical})"
                )));
            }
            if !seen.insert(canonical) {
                return Err(BacktestError::InvalidConfig(format!("duplicate pair {pair}")));
            }
        }
        if self.variant_id.trim().is_empty() {
            return Err(BacktestError::InvalidConfig("variant id is empty".to_string()));
        }
        if self.primary_timeframe < self.base_timeframe {
            return Err(BacktestError::InvalidConfig(format!(
                "primary timeframe {} is shorter than base {}",
                self.primary_timeframe, self.base_timeframe
            )));
        }
        if let Some(tf) = self.engine.timeframes.iter().find(|tf| **tf < self.base_timeframe) {
            return Err(BacktestError::InvalidConfig(format!(
                "analysis timeframe {tf} is shorter than base {}",
                self.base_timeframe
            )));
        }
        if self.signal_interval_bars == 0 || self.max_holding_bars == 0 || self.momentum_lookback_bars == 0 {
            return Err(BacktestError::InvalidConfig(
                "bar counts must be at least 1".to_string(),
            ));
        }
        let s = &self.spread;
        if !(s.spread_pips.is_finite() && s.spread_pips >= 0.0)
            || !(s.max_slippage_pips.is_finite() && s.max_slippage_pips >= 0.0)
        {
            return Err(BacktestError::InvalidConfig(
                "spread and slippage must be finite and non-negative".to_string(),
            ));
        }
        if self.units_per_trade == 0 {
            return Err(BacktestError::InvalidConfig("units per trade is zero".to_string()));
        }
        if self.base_win_range.0 <= 0.0 && self.base_win_range.1 <= 0.0 {
            return Err(BacktestError::InvalidConfig("win range has no target".to_string()));
        }
        if self.base_loss_range.0 >= 0.0 && self.base_loss_range.1 >= 0.0 {
            return Err(BacktestError::InvalidConfig("loss range has no stop".to_string()));
        }

        self.engine.validate()?;
        self.synthesis.validate()?;
        if let Some(table) = &self.shadow_table {
            table.validate()?;
        }
        Ok(())
    }

    /// Take-profit distance in pips (mean of the win range).
    pub fn target_pips(&self) -> f64 {
        (self.base_win_range.0 + self.base_win_range.1) / 2.0
    }

    /// Stop distance in pips (widest loss).
    pub fn stop_pips(&self) -> f64 {
        self.base_loss_range.0.abs().max(self.base_loss_range.1.abs())
    }
}
