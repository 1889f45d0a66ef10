use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// OHLCV bar data. `timestamp` is the bar's open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Time at which this bar's window closes.
    pub fn close_time(&self, timeframe: Timeframe) -> DateTime<Utc> {
        self.timestamp + timeframe.to_duration()
    }
}

/// Supported trading timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 5-minute bars
    Min5,
    /// 15-minute bars
    Min15,
    /// 1-hour bars
    Hour1,
    /// 4-hour bars
    Hour4,
    /// Daily bars
    Daily,
}

impl Timeframe {
    /// Get the duration represented by one bar
    pub fn to_duration(&self) -> Duration {
        Duration::minutes(self.to_minutes())
    }

    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
            Timeframe::Daily => 1440,
        }
    }

    /// Short label used in reports and readiness messages
    pub fn name(&self) -> &'static str {
        match self {
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Daily => "1d",
        }
    }

    /// All available timeframes, shortest first
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Hour1,
            Timeframe::Hour4,
            Timeframe::Daily,
        ]
    }

    /// The default analysis stack: 15m entry, 1h and 4h confirmation.
    pub fn default_stack() -> Vec<Timeframe> {
        vec![Timeframe::Min15, Timeframe::Hour1, Timeframe::Hour4]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Timeframe {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5m" | "5min" | "m5" => Ok(Timeframe::Min5),
            "15m" | "15min" | "m15" => Ok(Timeframe::Min15),
            "1h" | "1hour" | "h1" | "60m" => Ok(Timeframe::Hour1),
            "4h" | "4hour" | "h4" => Ok(Timeframe::Hour4),
            "1d" | "daily" | "d1" => Ok(Timeframe::Daily),
            other => Err(AnalysisError::UnknownTimeframe(other.to_string())),
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            other => Err(AnalysisError::InvalidData(format!("unknown direction '{other}'"))),
        }
    }
}
