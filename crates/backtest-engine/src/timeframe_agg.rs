use analysis_core::{Bar, Timeframe};
use chrono::{DateTime, TimeZone, Utc};

/// Aggregate base bars into `target` bars.
///
/// Buckets are aligned to the epoch (so 4h bars open at 00:00, 04:00, ...)
/// and produce one bar each with:
/// - open = first bar's open
/// - high = max high in the bucket
/// - low = min low in the bucket
/// - close = last bar's close
/// - volume = sum of all volumes
///
/// A trailing bucket whose window extends past the last base bar is dropped.
/// Buckets with gaps inside (weekends, missing data) are kept.
pub fn aggregate_bars(bars: &[Bar], base: Timeframe, target: Timeframe) -> Vec<Bar> {
    if target <= base {
        return bars.to_vec();
    }

    let mut out: Vec<Bar> = Vec::new();
    let mut current: Option<(DateTime<Utc>, Vec<&Bar>)> = None;

    for bar in bars {
        let start = bucket_start(bar.timestamp, target);
        match &mut current {
            Some((s, members)) if *s == start => members.push(bar),
            _ => {
                // Flush previous bucket
                if let Some((s, members)) = current.take() {
                    out.extend(make_bar(s, &members));
                }
                current = Some((start, vec![bar]));
            }
        }
    }

    if let Some((s, members)) = current {
        let complete = members
            .last()
            .map(|last| last.close_time(base) >= s + target.to_duration())
            .unwrap_or(false);
        if complete {
            out.extend(make_bar(s, &members));
        }
    }

    out
}

fn make_bar(start: DateTime<Utc>, members: &[&Bar]) -> Option<Bar> {
    let first = members.first()?;
    let last = members.last()?;
    Some(Bar {
        timestamp: start,
        open: first.open,
        high: members.iter().map(|b| b.high).fold(f64::MIN, f64::max),
        low: members.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        close: last.close,
        volume: members.iter().map(|b| b.volume).sum(),
    })
}

fn bucket_start(ts: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let secs = timeframe.to_minutes() * 60;
    let t = ts.timestamp();
    let floored = t - t.rem_euclid(secs);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_bars(n: usize) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let p = 1.1000 + 0.0001 * i as f64;
                Bar {
                    timestamp: t0 + Duration::minutes(15 * i as i64),
                    open: p,
                    high: p + 0.0005,
                    low: p - 0.0005,
                    close: p + 0.0001,
                    volume: 1.0,
                }
            })
            .collect()
    }

    #[test]
    fn four_quarters_make_an_hour() {
        let hours = aggregate_bars(&base_bars(8), Timeframe::Min15, Timeframe::Hour1);
        assert_eq!(hours.len(), 2);
        let h = &hours[0];
        assert!((h.open - 1.1000).abs() < 1e-12);
        assert!((h.close - 1.1004).abs() < 1e-12);
        assert!((h.high - 1.1008).abs() < 1e-12);
        assert!((h.low - 1.0995).abs() < 1e-12);
        assert_eq!(h.volume, 4.0);
        assert_eq!(hours[1].timestamp - h.timestamp, Duration::hours(1));
    }

    #[test]
    fn trailing_partial_bucket_is_dropped() {
        let hours = aggregate_bars(&base_bars(10), Timeframe::Min15, Timeframe::Hour1);
        assert_eq!(hours.len(), 2);
        let four = aggregate_bars(&base_bars(17), Timeframe::Min15, Timeframe::Hour4);
        assert_eq!(four.len(), 1);
    }

    #[test]
    fn same_timeframe_is_identity() {
        let bars = base_bars(3);
        assert_eq!(aggregate_bars(&bars, Timeframe::Min15, Timeframe::Min15), bars);
    }
}
