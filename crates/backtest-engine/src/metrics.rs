//! Summary statistics, derived only from the trade sequence.

use serde::{Deserialize, Serialize};

use crate::models::TradeRecord;

/// `{tradesCount, winRate, netPips, profitFactor, sharpe}` plus a few
/// extras. Recomputing from the same records always gives the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub trades_count: usize,
    pub wins: usize,
    pub losses: usize,
    /// Wins over all trades, `0..=1`
    pub win_rate: f64,
    pub net_pips: f64,
    pub gross_profit_pips: f64,
    pub gross_loss_pips: f64,
    /// Infinite when there are winners but no losers; `null` in JSON
    #[serde(with = "unbounded")]
    pub profit_factor: f64,
    /// Mean over sample standard deviation of per-trade pips
    pub sharpe: f64,
    /// Deepest peak-to-trough fall of cumulative pips
    pub max_drawdown_pips: f64,
    pub max_consecutive_losses: usize,
}

impl BacktestSummary {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let pips: Vec<f64> = records.iter().map(|r| r.pips).collect();
        Self::from_pips(&pips)
    }

    pub fn from_pips(pips: &[f64]) -> Self {
        let n = pips.len();
        let wins = pips.iter().filter(|p| **p > 0.0).count();
        let losses = pips.iter().filter(|p| **p < 0.0).count();
        let gross_profit: f64 = pips.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = pips.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
        let net: f64 = pips.iter().sum();

        let win_rate = if n > 0 { wins as f64 / n as f64 } else { 0.0 };

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Self {
            trades_count: n,
            wins,
            losses,
            win_rate,
            net_pips: net,
            gross_profit_pips: gross_profit,
            gross_loss_pips: gross_loss,
            profit_factor,
            sharpe: sharpe(pips),
            max_drawdown_pips: max_drawdown(pips),
            max_consecutive_losses: max_consecutive_losses(pips),
        }
    }
}

/// Per-trade Sharpe with Bessel's correction. 0 under two trades or with no
/// dispersion.
pub fn sharpe(pips: &[f64]) -> f64 {
    if pips.len() < 2 {
        return 0.0;
    }
    let n = pips.len() as f64;
    let mean = pips.iter().sum::<f64>() / n;
    let variance = pips.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev > 0.0 && std_dev.is_finite() {
        mean / std_dev
    } else {
        0.0
    }
}

pub fn max_drawdown(pips: &[f64]) -> f64 {
    let mut equity = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for p in pips {
        equity += p;
        peak = peak.max(equity);
        worst = worst.max(peak - equity);
    }
    worst
}

fn max_consecutive_losses(pips: &[f64]) -> usize {
    let mut max_l = 0;
    let mut l = 0;
    for p in pips {
        if *p < 0.0 {
            l += 1;
            max_l = max_l.max(l);
        } else if *p > 0.0 {
            l = 0;
        }
    }
    max_l
}

/// JSON has no infinity; it travels as `null`.
mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
