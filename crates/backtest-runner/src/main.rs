use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use backtest_engine::{BacktestSimulator, SqlTradeStore, TradeStore};
use tracing::{info, warn};

mod bars;
mod config;

use config::RunnerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = RunnerConfig::from_env()?;
    let bt = &config.backtest;
    info!("Backtest variant {}", bt.variant_id);
    info!("  Pairs: {}", bt.pairs.join(", "));
    info!("  Window: {} to {}", bt.start_date, bt.end_date);
    info!(
        "  Spread {:.1} pips, slippage up to {:.1} pips, seed {}",
        bt.spread.spread_pips, bt.spread.max_slippage_pips, bt.spread.seed
    );

    let store = SqlTradeStore::connect(&config.database_url).await?;
    bars::ensure_table(store.pool()).await?;
    let history = bars::load_bars(store.pool(), &bt.pairs, config.load_from(), bt.end_date).await?;

    let simulator = BacktestSimulator::new(bt.clone())?;
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current bar");
                cancel.store(true, std::sync::atomic::Ordering::Relaxed);
            }
        });
    }

    let outcome = tokio::task::spawn_blocking(move || {
        let mut last_logged = 0u64;
        simulator.run_with(
            &history,
            &mut |p| {
                let pct = p.percent() as u64;
                if pct >= last_logged + 10 {
                    last_logged = pct - pct % 10;
                    info!("{}% ({} / {} bars, {} trades)", last_logged, p.processed, p.total, p.trades);
                }
            },
            &cancel,
        )
    })
    .await
    .context("Backtest task panicked")??;

    let d = &outcome.diagnostics;
    info!(
        "Decisions: {} evaluated, {} admitted, {} rejected; {} dynamic gates created",
        d.decisions_evaluated, d.admitted, d.rejected, d.dynamic_gates.total_gates_created
    );
    for (gate, count) in &d.gate_triggers {
        info!("  {gate}: {count}");
    }

    store
        .clear(&outcome.variant_id)
        .await
        .with_context(|| format!("Failed to clear previous run of {}", outcome.variant_id))?;
    let persisted = store.persist(&outcome.trades).await;
    if persisted.is_complete() {
        info!("Persisted {} trades", persisted.inserted);
    } else {
        warn!("Persisted {} trades, {} failed", persisted.inserted, persisted.errors);
    }

    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    if d.cancelled {
        warn!("Run was cancelled after {} of {} bars", d.bars_processed, d.bars_total);
    }
    Ok(())
}
