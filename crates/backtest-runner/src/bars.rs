use std::collections::HashMap;

use analysis_core::Bar;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::AnyPool;
use tracing::{info, warn};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS historical_bars (
    pair TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (pair, timestamp)
)";

/// UTC bound without a zone suffix. As a text prefix it orders correctly
/// against both `Z` and `+00:00` spellings.
fn sql_bound(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[derive(sqlx::FromRow)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub async fn ensure_table(pool: &AnyPool) -> Result<()> {
    sqlx::query(CREATE_TABLE)
        .execute(pool)
        .await
        .context("Failed to create historical_bars")?;
    Ok(())
}

/// Base-timeframe bars for each pair in `[from, to)`, keyed by canonical pair.
///
/// Timestamps are stored as UTC RFC 3339 text. Rows with unparseable
/// timestamps are skipped with a warning.
pub async fn load_bars(
    pool: &AnyPool,
    pairs: &[String],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<HashMap<String, Vec<Bar>>> {
    let mut out = HashMap::new();
    for pair in pairs {
        let rows = sqlx::query_as::<_, BarRow>(
            "SELECT timestamp, open, high, low, close, volume
             FROM historical_bars
             WHERE pair = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp",
        )
        .bind(pair)
        .bind(sql_bound(from))
        .bind(sql_bound(to))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to load bars for {pair}"))?;

        let bars: Vec<Bar> = rows
            .into_iter()
            .filter_map(|row| match DateTime::parse_from_rfc3339(&row.timestamp) {
                Ok(ts) => Some(Bar {
                    timestamp: ts.with_timezone(&Utc),
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                }),
                Err(e) => {
                    warn!("Skipping {} bar with timestamp '{}': {}", pair, row.timestamp, e);
                    None
                }
            })
            .collect();

        info!("Loaded {} bars for {}", bars.len(), pair);
        out.insert(pair.clone(), bars);
    }
    Ok(out)
}
