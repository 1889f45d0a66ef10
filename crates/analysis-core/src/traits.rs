use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{AnalysisError, Bar, Timeframe};

/// Source of historical candles, keyed by canonical pair and timeframe.
///
/// Implementations must only return bars whose window has fully closed at
/// `as_of`; the analysis layer relies on this to stay free of look-ahead.
pub trait CandleSource: Send + Sync {
    /// Up to `limit` closed bars ending at or before `as_of`, oldest first.
    fn closed_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, AnalysisError>;
}

/// Candle store held in memory. Used by the backtester and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCandles {
    series: HashMap<(String, Timeframe), Vec<Bar>>,
}

impl InMemoryCandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a series. Bars are stored sorted by open time.
    pub fn insert(&mut self, symbol: &str, timeframe: Timeframe, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.series.insert((symbol.to_string(), timeframe), bars);
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<&[Bar]> {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl CandleSource for InMemoryCandles {
    fn closed_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let Some(bars) = self.series(symbol, timeframe) else {
            return Ok(Vec::new());
        };
        let end = bars.partition_point(|b| b.close_time(timeframe) <= as_of);
        let start = end.saturating_sub(limit);
        Ok(bars[start..end].to_vec())
    }
}
