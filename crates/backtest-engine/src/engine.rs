use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use analysis_core::{Bar, Direction, InMemoryCandles, Instrument, TickerResolver, Timeframe};
use chrono::{DateTime, Utc};
use decision_engine::{
    DecisionEngine, DynamicGateRegistry, ExtraContext, LossStreakSynthesizer, TradeProposal,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::*;
use serde_json::json;
use shadow_orders::{CorrelationTable, LegStatus, OrderLeg, ShadowOrderSplitter};
use tracing::{debug, info, warn};

use crate::config::BacktestConfig;
use crate::metrics::BacktestSummary;
use crate::models::*;
use crate::timeframe_agg::aggregate_bars;
use crate::BacktestError;

/// Replays the decision pipeline over historical bars.
///
/// Signals are evaluated at a bar's close and execute at the next bar's
/// **open**. The engine only ever sees bars that closed at or before the
/// decision time, so nothing later leaks in. Runs with the same config,
/// bars and seed produce identical trades.
pub struct BacktestSimulator {
    config: BacktestConfig,
}

/// A position being tracked during the run.
struct OpenTrade {
    direction: Direction,
    entry_price: f64,
    stop_price: f64,
    target_price: f64,
    opened_at: DateTime<Utc>,
    entry_bar: usize,
    composite_score: f64,
    triggered_gates: Vec<String>,
    legs: Vec<OrderLeg>,
}

/// An admitted decision waiting for the next bar's open.
struct PendingEntry {
    direction: Direction,
    composite_score: f64,
    triggered_gates: Vec<String>,
    legs: Vec<OrderLeg>,
}

struct PairState {
    instrument: Instrument,
    bars: Vec<Bar>,
    index: HashMap<DateTime<Utc>, usize>,
    last_seen: Option<usize>,
    open: Option<OpenTrade>,
    pending: Option<PendingEntry>,
}

/// Mutable bookkeeping for one run.
struct RunState {
    rng: StdRng,
    trades: Vec<TradeRecord>,
    decisions: usize,
    admitted: usize,
    rejected: usize,
    gate_triggers: BTreeMap<String, u64>,
}

struct ExitFill {
    price: f64,
    reason: ExitReason,
    /// Market fills slip; resting target orders don't
    market: bool,
}

impl BacktestSimulator {
    /// Fails fast on an invalid config.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&self, bars: &HashMap<String, Vec<Bar>>) -> Result<BacktestOutcome, BacktestError> {
        let never = AtomicBool::new(false);
        self.run_with(bars, &mut |_| {}, &never)
    }

    /// Run over base-timeframe bars keyed by canonical pair.
    ///
    /// `on_progress` is called after every timeline step. Setting `cancel`
    /// stops the run between steps; open trades are closed at their last
    /// seen bar and the partial outcome is returned with `cancelled` set.
    pub fn run_with(
        &self,
        bars: &HashMap<String, Vec<Bar>>,
        on_progress: &mut dyn FnMut(&BacktestProgress),
        cancel: &AtomicBool,
    ) -> Result<BacktestOutcome, BacktestError> {
        let cfg = &self.config;
        let resolver = TickerResolver::new(cfg.pairs.iter().map(String::as_str));

        let mut candles = InMemoryCandles::new();
        let mut pairs: Vec<PairState> = Vec::with_capacity(cfg.pairs.len());
        let mut higher: BTreeSet<Timeframe> = cfg.engine.timeframes.iter().copied().collect();
        higher.insert(cfg.primary_timeframe);
        higher.retain(|tf| *tf > cfg.base_timeframe);

        for pair in &cfg.pairs {
            let Ok(Some(instrument)) = resolver.resolve(pair) else {
                continue;
            };
            let mut series: Vec<Bar> = bars
                .get(pair)
                .map(|b| b.iter().filter(|b| b.timestamp < cfg.end_date).cloned().collect())
                .unwrap_or_default();
            series.sort_by_key(|b| b.timestamp);
            series.dedup_by_key(|b| b.timestamp);
            if series.is_empty() {
                warn!("No {} bars for {}, it will not trade", cfg.base_timeframe, pair);
            }

            for tf in &higher {
                candles.insert(pair, *tf, aggregate_bars(&series, cfg.base_timeframe, *tf));
            }
            candles.insert(pair, cfg.base_timeframe, series.clone());

            let index = series
                .iter()
                .enumerate()
                .map(|(i, b)| (b.timestamp, i))
                .collect();
            pairs.push(PairState {
                instrument,
                bars: series,
                index,
                last_seen: None,
                open: None,
                pending: None,
            });
        }

        let registry = Arc::new(DynamicGateRegistry::new());
        let engine = DecisionEngine::new(cfg.engine.clone(), Arc::new(candles), registry.clone())?;
        let splitter = ShadowOrderSplitter::new(
            cfg.shadow_table.clone().unwrap_or_else(CorrelationTable::empty),
        )?;
        let mut synthesizer = LossStreakSynthesizer::new(cfg.synthesis.clone());

        let timeline: Vec<DateTime<Utc>> = pairs
            .iter()
            .flat_map(|p| p.bars.iter().map(|b| b.timestamp))
            .filter(|ts| *ts >= cfg.start_date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let total = timeline.len();

        info!(
            "Running backtest {}: {} pairs, {} steps from {} to {}",
            cfg.variant_id,
            pairs.len(),
            total,
            cfg.start_date,
            cfg.end_date
        );

        let mut run = RunState {
            rng: StdRng::seed_from_u64(cfg.spread.seed),
            trades: Vec::new(),
            decisions: 0,
            admitted: 0,
            rejected: 0,
            gate_triggers: BTreeMap::new(),
        };
        let mut processed = 0;
        let mut cancelled = false;
        let mut clock = cfg.start_date;

        for ts in &timeline {
            if cancel.load(Ordering::Relaxed) {
                info!("Backtest {} cancelled after {} of {} steps", cfg.variant_id, processed, total);
                cancelled = true;
                break;
            }

            for state in pairs.iter_mut() {
                let Some(&idx) = state.index.get(ts) else {
                    continue;
                };
                state.last_seen = Some(idx);
                self.step(state, idx, &engine, &splitter, &registry, &mut synthesizer, &mut run)?;
            }

            clock = *ts + cfg.base_timeframe.to_duration();
            processed += 1;
            on_progress(&BacktestProgress {
                processed,
                total,
                trades: run.trades.len(),
            });
        }

        for state in pairs.iter_mut() {
            let (Some(open), Some(idx)) = (state.open.take(), state.last_seen) else {
                continue;
            };
            let bar = &state.bars[idx];
            let fill = ExitFill {
                price: bar.close,
                reason: ExitReason::EndOfData,
                market: true,
            };
            let closed_at = bar.close_time(cfg.base_timeframe);
            self.close(state, open, fill, closed_at, &mut run);
        }

        let summary = BacktestSummary::from_records(&run.trades);
        info!(
            "Backtest {} finished: {} trades, win rate {:.1}%, net {:+.1} pips, PF {:.2}, Sharpe {:.2}",
            cfg.variant_id,
            summary.trades_count,
            summary.win_rate * 100.0,
            summary.net_pips,
            summary.profit_factor,
            summary.sharpe
        );

        Ok(BacktestOutcome {
            variant_id: cfg.variant_id.clone(),
            start_date: cfg.start_date,
            end_date: cfg.end_date,
            summary,
            diagnostics: BacktestDiagnostics {
                bars_processed: processed,
                bars_total: total,
                decisions_evaluated: run.decisions,
                admitted: run.admitted,
                rejected: run.rejected,
                gate_triggers: run.gate_triggers,
                cancelled,
                dynamic_gates: registry.snapshot(clock),
            },
            trades: run.trades,
        })
    }

    /// One pair, one bar: fill a pending entry at the open, check exits
    /// inside the bar, then look for a new signal at the close.
    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        state: &mut PairState,
        idx: usize,
        engine: &DecisionEngine,
        splitter: &ShadowOrderSplitter,
        registry: &DynamicGateRegistry,
        synthesizer: &mut LossStreakSynthesizer,
        run: &mut RunState,
    ) -> Result<(), BacktestError> {
        let cfg = &self.config;
        let pip = state.instrument.pip_size();
        let half_spread = cfg.spread.spread_pips / 2.0;

        if let Some(entry) = state.pending.take() {
            let bar = &state.bars[idx];
            let sign = entry.direction.sign();
            let slip = draw_slippage(&mut run.rng, cfg.spread.max_slippage_pips);
            let entry_price = bar.open + sign * pip * (half_spread + slip);
            state.open = Some(OpenTrade {
                direction: entry.direction,
                entry_price,
                stop_price: entry_price - sign * pip * cfg.stop_pips(),
                target_price: entry_price + sign * pip * cfg.target_pips(),
                opened_at: bar.timestamp,
                entry_bar: idx,
                composite_score: entry.composite_score,
                triggered_gates: entry.triggered_gates,
                legs: entry.legs,
            });
        }

        if let Some(open) = state.open.take() {
            let bar = &state.bars[idx];
            match exit_fill(&open, bar, idx, cfg.max_holding_bars) {
                Some(fill) => {
                    let closed_at = bar.close_time(cfg.base_timeframe);
                    let pips = self.close(state, open, fill, closed_at, run);
                    let pair = state.instrument.canonical.clone();
                    synthesizer.observe(&pair, pips, closed_at, registry);
                }
                None => state.open = Some(open),
            }
        }

        if state.open.is_some() || state.pending.is_some() {
            return Ok(());
        }
        let bar = &state.bars[idx];
        let slot = bar.timestamp.timestamp() / (cfg.base_timeframe.to_minutes() * 60);
        if slot % cfg.signal_interval_bars as i64 != 0 || idx < cfg.momentum_lookback_bars {
            return Ok(());
        }
        let past = state.bars[idx - cfg.momentum_lookback_bars].close;
        let direction = if bar.close > past {
            Direction::Long
        } else if bar.close < past {
            Direction::Short
        } else {
            return Ok(());
        };

        let as_of = bar.close_time(cfg.base_timeframe);
        let proposal = TradeProposal {
            index: run.decisions as u64,
            pair: state.instrument.canonical.clone(),
            direction,
            base_win_probability: cfg.base_win_probability,
            base_win_range: cfg.base_win_range,
            base_loss_range: cfg.base_loss_range,
        };
        let mut extra = ExtraContext::at(as_of).with_spread(cfg.spread.spread_pips);
        extra.tags = json!({ "variantId": cfg.variant_id });

        let decision = engine.evaluate_full_decision(&proposal, cfg.primary_timeframe, &extra)?;
        run.decisions += 1;
        for id in decision.triggered_ids() {
            *run.gate_triggers.entry(id).or_insert(0) += 1;
        }

        if !decision.admitted {
            run.rejected += 1;
            return Ok(());
        }
        run.admitted += 1;

        let mut plan = splitter.split(&decision, cfg.units_per_trade)?;
        plan.mark_pending(LegStatus::Simulated);
        state.pending = Some(PendingEntry {
            direction,
            composite_score: decision.composite_score,
            triggered_gates: decision.triggered_ids(),
            legs: plan.legs,
        });
        Ok(())
    }

    /// Book a closed trade. Returns its net pips.
    fn close(
        &self,
        state: &PairState,
        open: OpenTrade,
        fill: ExitFill,
        closed_at: DateTime<Utc>,
        run: &mut RunState,
    ) -> f64 {
        let cfg = &self.config;
        let inst = &state.instrument;
        let sign = open.direction.sign();
        let slip = if fill.market {
            draw_slippage(&mut run.rng, cfg.spread.max_slippage_pips)
        } else {
            0.0
        };
        let exit = fill.price - sign * inst.pip_size() * (cfg.spread.spread_pips / 2.0 + slip);

        let entry_price = to_price(open.entry_price, inst.precision);
        let exit_price = to_price(exit, inst.precision);
        let pips = net_pips(entry_price, exit_price, open.direction, inst);

        debug!(
            "{} {} {} -> {} ({}): {:+.1} pips",
            inst.canonical,
            open.direction,
            entry_price,
            exit_price,
            fill.reason.as_str(),
            pips
        );

        run.trades.push(TradeRecord {
            variant_id: cfg.variant_id.clone(),
            trade_index: run.trades.len() as u64,
            pair: inst.canonical.clone(),
            direction: open.direction,
            entry_price,
            exit_price,
            pips,
            opened_at: open.opened_at,
            closed_at,
            exit_reason: fill.reason,
            composite_score: open.composite_score,
            triggered_gates: open.triggered_gates,
            legs: open.legs,
        });
        pips
    }
}

/// Stop is checked before target inside a bar. Gaps through either level
/// fill at the open.
fn exit_fill(open: &OpenTrade, bar: &Bar, idx: usize, max_holding: usize) -> Option<ExitFill> {
    let long = open.direction == Direction::Long;

    let stop_hit = if long { bar.low <= open.stop_price } else { bar.high >= open.stop_price };
    if stop_hit {
        let price = if long {
            bar.open.min(open.stop_price)
        } else {
            bar.open.max(open.stop_price)
        };
        return Some(ExitFill {
            price,
            reason: ExitReason::Stop,
            market: true,
        });
    }

    let target_hit = if long { bar.high >= open.target_price } else { bar.low <= open.target_price };
    if target_hit {
        let price = if long {
            bar.open.max(open.target_price)
        } else {
            bar.open.min(open.target_price)
        };
        return Some(ExitFill {
            price,
            reason: ExitReason::Target,
            market: false,
        });
    }

    if idx + 1 - open.entry_bar >= max_holding {
        return Some(ExitFill {
            price: bar.close,
            reason: ExitReason::TimeLimit,
            market: true,
        });
    }
    None
}

fn draw_slippage(rng: &mut StdRng, max_pips: f64) -> f64 {
    if max_pips > 0.0 {
        rng.gen_range(0.0..=max_pips)
    } else {
        0.0
    }
}

fn to_price(value: f64, precision: u32) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(precision)
}

/// Pips between two rounded prices, to a tenth of a pip.
pub fn net_pips(entry: Decimal, exit: Decimal, direction: Direction, instrument: &Instrument) -> f64 {
    // Quotes carry one digit past the pip (pipettes)
    let pip = Decimal::new(1, instrument.precision.saturating_sub(1));
    let mut diff = (exit - entry) / pip;
    if direction == Direction::Short {
        diff = -diff;
    }
    diff.round_dp(1).to_f64().unwrap_or(0.0)
}
