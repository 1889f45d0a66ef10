use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use analysis_core::{Bar, Direction};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use shadow_orders::{CorrelationTable, LegStatus};

use crate::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap()
}

/// Random walk with a slow cyclical drift, 15m bars. `pip` sets the scale.
fn synthetic_bars(seed: u64, n: usize, start_price: f64, pip: f64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut close = start_price;
    (0..n)
        .map(|i| {
            let open = close;
            let drift = 1.5 * (i as f64 * std::f64::consts::TAU / 400.0).sin();
            close = open + pip * (drift + rng.gen_range(-4.0..4.0));
            let high = open.max(close) + pip * rng.gen_range(0.0..3.0);
            let low = open.min(close) - pip * rng.gen_range(0.0..3.0);
            Bar {
                timestamp: t0() + Duration::minutes(15 * i as i64),
                open,
                high,
                low,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

fn market() -> HashMap<String, Vec<Bar>> {
    let mut bars = HashMap::new();
    bars.insert("EUR_USD".to_string(), synthetic_bars(1, 2_400, 1.0850, 0.0001));
    bars.insert("USD_JPY".to_string(), synthetic_bars(2, 2_400, 150.00, 0.01));
    bars
}

/// Five days of warm-up for the 4h analysis, then ~20 days of trading.
fn test_config() -> BacktestConfig {
    let mut c = BacktestConfig::default_for(t0() + Duration::days(25));
    c.start_date = t0() + Duration::days(5);
    c.pairs = vec!["EUR_USD".to_string(), "USD_JPY".to_string()];
    c.variant_id = "test-variant".to_string();
    c
}

fn run(config: BacktestConfig) -> BacktestOutcome {
    BacktestSimulator::new(config).unwrap().run(&market()).unwrap()
}

fn record(variant: &str, i: u64) -> TradeRecord {
    TradeRecord {
        variant_id: variant.to_string(),
        trade_index: i,
        pair: "EUR_USD".to_string(),
        direction: if i % 2 == 0 { Direction::Long } else { Direction::Short },
        entry_price: Decimal::new(108_500 + i as i64, 5),
        exit_price: Decimal::new(108_530 + i as i64, 5),
        pips: if i % 3 == 0 { -4.2 } else { 3.0 },
        opened_at: t0() + Duration::minutes(15 * i as i64),
        closed_at: t0() + Duration::minutes(15 * i as i64 + 60),
        exit_reason: ExitReason::Target,
        composite_score: 12.5,
        triggered_gates: Vec::new(),
        legs: Vec::new(),
    }
}

#[test]
fn test_same_seed_same_trades() {
    let a = run(test_config());
    let b = run(test_config());
    assert!(!a.trades.is_empty(), "expected some admitted trades");
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.diagnostics, b.diagnostics);
}

#[test]
fn test_seed_changes_fills() {
    let a = run(test_config());
    let mut other = test_config();
    other.spread.seed = 7;
    let b = run(other);
    assert_ne!(a.trades, b.trades);
}

#[test]
fn test_summary_recomputes_from_trades() {
    let outcome = run(test_config());
    assert_eq!(BacktestSummary::from_records(&outcome.trades), outcome.summary);
    assert_eq!(outcome.summary.trades_count, outcome.trades.len());
}

#[test]
fn test_trade_invariants() {
    let outcome = run(test_config());
    let mut open_until: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for (i, t) in outcome.trades.iter().enumerate() {
        assert_eq!(t.trade_index, i as u64);
        assert!(t.closed_at > t.opened_at);
        assert!(t.opened_at >= test_config().start_date);
        assert_eq!(t.variant_id, "test-variant");
        // JPY quotes carry 3 decimals, the rest 5
        let dp = if t.pair == "USD_JPY" { 3 } else { 5 };
        assert!(t.entry_price.scale() <= dp);
        // One open trade per pair
        if let Some(prev_close) = open_until.get(t.pair.as_str()) {
            assert!(t.opened_at >= *prev_close);
        }
        open_until.insert(t.pair.as_str(), t.closed_at);
        assert_eq!(t.legs.len(), 1);
        assert_eq!(t.legs[0].units, 10_000);
    }
}

#[test]
fn test_later_prices_do_not_change_earlier_trades() {
    let cutoff = t0() + Duration::days(12);
    let original = market();
    let mut altered = market();
    for bars in altered.values_mut() {
        for bar in bars.iter_mut().filter(|b| b.timestamp >= cutoff) {
            bar.open *= 1.05;
            bar.high *= 1.05;
            bar.low *= 1.05;
            bar.close *= 1.05;
        }
    }

    let sim = BacktestSimulator::new(test_config()).unwrap();
    let a = sim.run(&original).unwrap();
    let b = sim.run(&altered).unwrap();

    let before = |o: &BacktestOutcome| -> Vec<TradeRecord> {
        o.trades.iter().filter(|t| t.closed_at <= cutoff).cloned().collect()
    };
    assert!(!before(&a).is_empty());
    assert_eq!(before(&a), before(&b));
}

#[test]
fn test_progress_reaches_total() {
    let sim = BacktestSimulator::new(test_config()).unwrap();
    let mut seen = Vec::new();
    let never = AtomicBool::new(false);
    let outcome = sim
        .run_with(&market(), &mut |p| seen.push(*p), &never)
        .unwrap();

    assert_eq!(seen.len(), outcome.diagnostics.bars_total);
    assert!(seen.windows(2).all(|w| w[1].processed == w[0].processed + 1));
    let last = seen.last().unwrap();
    assert_eq!(last.percent(), 100.0);
    assert!(!outcome.diagnostics.cancelled);
}

#[test]
fn test_cancellation_returns_partial_results() {
    let sim = BacktestSimulator::new(test_config()).unwrap();
    let cancel = AtomicBool::new(false);
    let outcome = sim
        .run_with(
            &market(),
            &mut |p| {
                if p.processed == 300 {
                    cancel.store(true, Ordering::Relaxed);
                }
            },
            &cancel,
        )
        .unwrap();

    let d = &outcome.diagnostics;
    assert!(d.cancelled);
    assert_eq!(d.bars_processed, 300);
    assert!(d.bars_total > 300);
    assert_eq!(BacktestSummary::from_records(&outcome.trades), outcome.summary);
    let last_step = test_config().start_date + Duration::minutes(15 * 300);
    assert!(outcome.trades.iter().all(|t| t.closed_at <= last_step));
}

#[test]
fn test_invalid_config_fails_before_running() {
    let mut c = test_config();
    c.pairs.clear();
    assert!(matches!(BacktestSimulator::new(c), Err(BacktestError::InvalidConfig(_))));

    let mut c = test_config();
    c.end_date = c.start_date - Duration::days(1);
    assert!(matches!(BacktestSimulator::new(c), Err(BacktestError::InvalidConfig(_))));
}

#[test]
fn test_no_data_gives_empty_summary() {
    let sim = BacktestSimulator::new(test_config()).unwrap();
    let outcome = sim.run(&HashMap::new()).unwrap();
    assert!(outcome.trades.is_empty());
    let s = &outcome.summary;
    assert_eq!(s.trades_count, 0);
    assert_eq!(s.win_rate, 0.0);
    assert_eq!(s.net_pips, 0.0);
    assert_eq!(s.profit_factor, 0.0);
    assert_eq!(s.sharpe, 0.0);
}

#[test]
fn test_pair_without_bars_is_skipped() {
    let mut c = test_config();
    c.pairs.push("GBP_USD".to_string());
    let outcome = run(c);
    assert!(outcome.trades.iter().all(|t| t.pair != "GBP_USD"));
}

#[test]
fn test_gate_histogram_counts_rejections() {
    let mut c = test_config();
    c.engine.thresholds.min_win_probability = 0.9;
    let outcome = run(c);
    let d = &outcome.diagnostics;
    assert!(outcome.trades.is_empty());
    assert!(d.decisions_evaluated > 0);
    assert_eq!(d.rejected, d.decisions_evaluated);
    assert_eq!(d.gate_triggers.get("G1").copied(), Some(d.decisions_evaluated as u64));
}

#[test]
fn test_loss_streaks_synthesize_gates() {
    let mut c = test_config();
    c.synthesis.pair_loss_streak = 1;
    c.synthesis.global_loss_streak = 10_000;
    let outcome = run(c);

    let observed_losses = outcome
        .trades
        .iter()
        .filter(|t| t.is_loss() && t.exit_reason != ExitReason::EndOfData)
        .count() as u64;
    assert!(observed_losses > 0);
    assert_eq!(outcome.diagnostics.dynamic_gates.total_gates_created, observed_losses);
}

#[test]
fn test_shadow_legs_are_recorded() {
    let mut c = test_config();
    c.shadow_table = Some(CorrelationTable::default());
    let outcome = run(c);
    let eur: Vec<&TradeRecord> = outcome.trades.iter().filter(|t| t.pair == "EUR_USD").collect();
    assert!(!eur.is_empty());
    for t in eur {
        assert_eq!(t.legs.len(), 3);
        assert_eq!(t.legs.iter().map(|l| l.units).sum::<u64>(), 10_000);
        assert!(t.legs.iter().all(|l| l.status == LegStatus::Simulated));
    }
}

#[tokio::test]
async fn test_memory_store_isolates_failures() {
    let store = MemoryTradeStore::failing_when(|r| r.trade_index % 40 == 7);
    let records: Vec<TradeRecord> = (0..100).map(|i| record("v1", i)).collect();

    let outcome = store.persist(&records).await;
    assert_eq!(outcome.inserted, 97);
    assert_eq!(outcome.errors, 3);
    assert_eq!(outcome.failures.len(), 3);

    store.clear("v1").await.unwrap();
    assert!(store.load("v1").await.unwrap().is_empty());
    store.clear("v1").await.unwrap();
}

async fn sql_store() -> SqlTradeStore {
    SqlTradeStore::connect("sqlite::memory:").await.unwrap()
}

#[tokio::test]
async fn test_sql_store_partial_batch_then_clear() {
    let store = sql_store().await;
    let mut records: Vec<TradeRecord> = (0..97).map(|i| record("v1", i)).collect();
    // Two duplicate keys and one malformed pair
    records.push(record("v1", 5));
    records.push(record("v1", 50));
    let mut bad = record("v1", 97);
    bad.pair = "EURUSD".to_string();
    records.push(bad);
    assert_eq!(records.len(), 100);

    let outcome = store.persist(&records).await;
    assert_eq!(outcome.inserted, 97);
    assert_eq!(outcome.errors, 3);
    assert!(!outcome.is_complete());

    store.persist(&[record("v2", 0)]).await;
    store.clear("v1").await.unwrap();
    assert!(store.load("v1").await.unwrap().is_empty());
    assert_eq!(store.load("v2").await.unwrap().len(), 1);

    store.clear("v1").await.unwrap();
}

#[tokio::test]
async fn test_sql_round_trip_preserves_summary() {
    let outcome = run(test_config());
    let store = sql_store().await;

    let persisted = store.persist(&outcome.trades).await;
    assert_eq!(persisted.inserted, outcome.trades.len());
    assert_eq!(persisted.errors, 0);

    let loaded = store.load("test-variant").await.unwrap();
    assert_eq!(loaded, outcome.trades);
    assert_eq!(BacktestSummary::from_records(&loaded), outcome.summary);
}
