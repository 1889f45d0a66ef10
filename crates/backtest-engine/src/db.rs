use std::str::FromStr;

use analysis_core::Direction;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::models::{ExitReason, TradeRecord};
use crate::store::{PersistOutcome, TradeStore};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS backtest_trades (
    variant_id TEXT NOT NULL,
    trade_index INTEGER NOT NULL,
    pair TEXT NOT NULL CHECK (length(pair) = 7),
    direction TEXT NOT NULL CHECK (direction IN ('long', 'short')),
    entry_price TEXT NOT NULL,
    exit_price TEXT NOT NULL,
    pips REAL NOT NULL,
    opened_at TEXT NOT NULL,
    closed_at TEXT NOT NULL,
    exit_reason TEXT NOT NULL,
    composite_score REAL NOT NULL,
    triggered_gates TEXT NOT NULL,
    legs TEXT NOT NULL,
    PRIMARY KEY (variant_id, trade_index)
)";

/// Persists backtest trades through any sqlx driver.
pub struct SqlTradeStore {
    pool: AnyPool,
}

impl SqlTradeStore {
    /// Wrap an existing pool and make sure the table exists.
    pub async fn new(pool: AnyPool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;
        Self::new(pool).await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn init_tables(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create backtest_trades")?;
        Ok(())
    }

    async fn insert(&self, record: &TradeRecord) -> anyhow::Result<()> {
        let gates = serde_json::to_string(&record.triggered_gates)?;
        let legs = serde_json::to_string(&record.legs)?;
        sqlx::query(
            "INSERT INTO backtest_trades (
                variant_id, trade_index, pair, direction, entry_price, exit_price,
                pips, opened_at, closed_at, exit_reason, composite_score,
                triggered_gates, legs
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.variant_id)
        .bind(i64::try_from(record.trade_index)?)
        .bind(&record.pair)
        .bind(record.direction.as_str())
        .bind(record.entry_price.to_string())
        .bind(record.exit_price.to_string())
        .bind(record.pips)
        .bind(record.opened_at.to_rfc3339())
        .bind(record.closed_at.to_rfc3339())
        .bind(record.exit_reason.as_str())
        .bind(record.composite_score)
        .bind(gates)
        .bind(legs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for SqlTradeStore {
    async fn persist(&self, trades: &[TradeRecord]) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        for record in trades {
            match self.insert(record).await {
                Ok(()) => outcome.inserted += 1,
                Err(e) => outcome.record_failure(record, e),
            }
        }
        outcome
    }

    async fn clear(&self, variant_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM backtest_trades WHERE variant_id = ?")
            .bind(variant_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to clear variant {variant_id}"))?;
        Ok(())
    }

    async fn load(&self, variant_id: &str) -> anyhow::Result<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT variant_id, trade_index, pair, direction, entry_price, exit_price,
                    pips, opened_at, closed_at, exit_reason, composite_score,
                    triggered_gates, legs
             FROM backtest_trades WHERE variant_id = ? ORDER BY trade_index",
        )
        .bind(variant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TradeRow::into_record).collect()
    }
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct TradeRow {
    variant_id: String,
    trade_index: i64,
    pair: String,
    direction: String,
    entry_price: String,
    exit_price: String,
    pips: f64,
    opened_at: String,
    closed_at: String,
    exit_reason: String,
    composite_score: f64,
    triggered_gates: String,
    legs: String,
}

impl TradeRow {
    fn into_record(self) -> anyhow::Result<TradeRecord> {
        let parse_time = |s: &str| -> anyhow::Result<DateTime<Utc>> {
            Ok(DateTime::parse_from_rfc3339(s)
                .with_context(|| format!("bad timestamp '{s}'"))?
                .with_timezone(&Utc))
        };
        Ok(TradeRecord {
            trade_index: u64::try_from(self.trade_index)?,
            direction: Direction::from_str(&self.direction)?,
            entry_price: Decimal::from_str(&self.entry_price)?,
            exit_price: Decimal::from_str(&self.exit_price)?,
            pips: self.pips,
            opened_at: parse_time(&self.opened_at)?,
            closed_at: parse_time(&self.closed_at)?,
            exit_reason: ExitReason::from_str(&self.exit_reason).map_err(|e| anyhow!(e))?,
            composite_score: self.composite_score,
            triggered_gates: serde_json::from_str(&self.triggered_gates)?,
            legs: serde_json::from_str(&self.legs)?,
            variant_id: self.variant_id,
            pair: self.pair,
        })
    }
}
