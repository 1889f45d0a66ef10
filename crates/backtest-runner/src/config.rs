use anyhow::{bail, Context, Result};
use backtest_engine::{BacktestConfig, DEFAULT_WINDOW_DAYS};
use chrono::{DateTime, Duration, Utc};
use std::env;
use std::str::FromStr;

/// Days of bars loaded before the window so every timeframe is ready on day one.
pub const WARMUP_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub database_url: String,
    pub warmup_days: i64,
    pub backtest: BacktestConfig,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok(), Utc::now())
    }

    /// Build from any key lookup. Unset keys keep their defaults; set but
    /// unparseable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, now: DateTime<Utc>) -> Result<Self> {
        let mut backtest = BacktestConfig::default_for(now);

        let days: i64 = parse_var(&lookup, "BACKTEST_DAYS")?.unwrap_or(DEFAULT_WINDOW_DAYS);
        if days <= 0 {
            bail!("BACKTEST_DAYS must be positive, got {days}");
        }
        backtest.start_date = now - Duration::days(days);

        if let Some(list) = lookup("BACKTEST_PAIRS").filter(|s| !s.trim().is_empty()) {
            backtest.pairs = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    analysis_core::parse_pair(p)
                        .map(|(base, quote)| format!("{base}_{quote}"))
                        .with_context(|| format!("BACKTEST_PAIRS entry '{p}'"))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(variant) = lookup("BACKTEST_VARIANT") {
            backtest.variant_id = variant.trim().to_string();
        }
        if let Some(seed) = parse_var(&lookup, "BACKTEST_SEED")? {
            backtest.spread.seed = seed;
        }
        if let Some(spread) = parse_var(&lookup, "SPREAD_PIPS")? {
            backtest.spread.spread_pips = spread;
        }
        if let Some(slip) = parse_var(&lookup, "MAX_SLIPPAGE_PIPS")? {
            backtest.spread.max_slippage_pips = slip;
        }
        if let Some(p) = parse_var(&lookup, "MIN_WIN_PROBABILITY")? {
            backtest.engine.thresholds.min_win_probability = p;
        }
        if let Some(penalty) = parse_var(&lookup, "GATE_PENALTY")? {
            backtest.engine.weights.gate_penalty = penalty;
        }

        let config = Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:backtest.db?mode=rwc".to_string()),
            warmup_days: WARMUP_DAYS,
            backtest,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.backtest
            .validate()
            .context("Invalid backtest configuration")?;
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL is empty");
        }
        Ok(())
    }

    /// First bar timestamp worth loading.
    pub fn load_from(&self) -> DateTime<Utc> {
        self.backtest.start_date - Duration::days(self.warmup_days)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key}='{raw}' is not valid")),
    }
}
