use std::collections::BTreeMap;

use analysis_core::Direction;
use chrono::{DateTime, Utc};
use decision_engine::RegistrySnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shadow_orders::OrderLeg;

use crate::metrics::BacktestSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Target,
    Stop,
    TimeLimit,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Target => "target",
            ExitReason::Stop => "stop",
            ExitReason::TimeLimit => "time_limit",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target" => Ok(ExitReason::Target),
            "stop" => Ok(ExitReason::Stop),
            "time_limit" => Ok(ExitReason::TimeLimit),
            "end_of_data" => Ok(ExitReason::EndOfData),
            other => Err(format!("unknown exit reason '{other}'")),
        }
    }
}

/// A round-trip trade produced by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub variant_id: String,
    /// Position in the run's trade sequence
    pub trade_index: u64,
    pub pair: String,
    pub direction: Direction,
    /// Fill prices, rounded to the instrument's quote precision
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// Net of spread and slippage
    pub pips: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub composite_score: f64,
    /// Gates that fired at entry without blocking (advisory)
    pub triggered_gates: Vec<String>,
    /// Execution legs; a single primary leg unless shadows are configured
    #[serde(default)]
    pub legs: Vec<OrderLeg>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pips > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pips < 0.0
    }
}

/// Reported to the progress callback after every timeline step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestProgress {
    pub processed: usize,
    pub total: usize,
    pub trades: usize,
}

impl BacktestProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestDiagnostics {
    /// Timeline steps actually simulated
    pub bars_processed: usize,
    pub bars_total: usize,
    pub decisions_evaluated: usize,
    pub admitted: usize,
    pub rejected: usize,
    /// Times each gate id fired, blocking or not
    pub gate_triggers: BTreeMap<String, u64>,
    pub cancelled: bool,
    pub dynamic_gates: RegistrySnapshot,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestOutcome {
    pub variant_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub trades: Vec<TradeRecord>,
    pub summary: BacktestSummary,
    pub diagnostics: BacktestDiagnostics,
}
