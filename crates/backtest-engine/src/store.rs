use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::TradeRecord;

/// Result of a batched append. Rows fail one at a time; the batch never aborts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub inserted: usize,
    pub errors: usize,
    /// One message per failed row
    #[serde(default)]
    pub failures: Vec<String>,
}

impl PersistOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors == 0
    }

    pub(crate) fn record_failure(&mut self, record: &TradeRecord, error: impl std::fmt::Display) {
        warn!(
            "Failed to persist trade {}#{} ({}): {}",
            record.variant_id, record.trade_index, record.pair, error
        );
        self.errors += 1;
        self.failures
            .push(format!("{}#{}: {}", record.variant_id, record.trade_index, error));
    }
}

/// Where backtest trades go.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Append every record it can; never fails as a whole.
    async fn persist(&self, trades: &[TradeRecord]) -> PersistOutcome;

    /// Remove all records of a variant. Clearing an empty variant is fine.
    async fn clear(&self, variant_id: &str) -> anyhow::Result<()>;

    /// Records of a variant in trade order.
    async fn load(&self, variant_id: &str) -> anyhow::Result<Vec<TradeRecord>>;
}

type RowFilter = Box<dyn Fn(&TradeRecord) -> bool + Send + Sync>;

/// Store held in memory. A failure predicate can reject chosen rows.
#[derive(Default)]
pub struct MemoryTradeStore {
    rows: Mutex<Vec<TradeRecord>>,
    reject: Option<RowFilter>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows matching `reject` fail to persist.
    pub fn failing_when(reject: impl Fn(&TradeRecord) -> bool + Send + Sync + 'static) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            reject: Some(Box::new(reject)),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn persist(&self, trades: &[TradeRecord]) -> PersistOutcome {
        let mut rows = self.rows.lock().await;
        let mut outcome = PersistOutcome::default();
        for record in trades {
            let rejected = self.reject.as_ref().is_some_and(|f| f(record));
            let duplicate = rows
                .iter()
                .any(|r| r.variant_id == record.variant_id && r.trade_index == record.trade_index);
            if rejected {
                outcome.record_failure(record, "rejected by store");
            } else if duplicate {
                outcome.record_failure(record, "duplicate trade index");
            } else {
                rows.push(record.clone());
                outcome.inserted += 1;
            }
        }
        outcome
    }

    async fn clear(&self, variant_id: &str) -> anyhow::Result<()> {
        self.rows.lock().await.retain(|r| r.variant_id != variant_id);
        Ok(())
    }

    async fn load(&self, variant_id: &str) -> anyhow::Result<Vec<TradeRecord>> {
        let mut out: Vec<TradeRecord> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|r| r.variant_id == variant_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.trade_index);
        Ok(out)
    }
}
