#[cfg(test)]
mod tests {
    use super::super::indicators::*;
    use analysis_core::Bar;
    use chrono::{Duration, TimeZone, Utc};

    /// Closes of a choppy but rising FX-like series.
    fn rising_closes() -> Vec<f64> {
        (0..20)
            .map(|i| 1.1000 + 0.0004 * i as f64 + if i % 3 == 0 { -0.0006 } else { 0.0002 })
            .collect()
    }

    /// Twenty hourly bars stepping up one point per bar, two points of range.
    fn stepping_bars() -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..20)
            .map(|i| {
                let open = 100.0 + i as f64;
                Bar {
                    timestamp: t0 + Duration::hours(i as i64),
                    open,
                    high: open + 2.0,
                    low: open - 1.0,
                    close: open + 1.0,
                    volume: 500.0,
                }
            })
            .collect()
    }

    fn reversed(bars: &[Bar]) -> Vec<Bar> {
        let closes: Vec<f64> = bars.iter().rev().map(|b| b.close).collect();
        bars.iter()
            .zip(closes)
            .map(|(b, close)| Bar {
                open: close + 1.0,
                high: close + 2.0,
                low: close - 1.0,
                close,
                ..b.clone()
            })
            .collect()
    }

    #[test]
    fn test_sma_window_means() {
        let means = sma(&[2.0, 4.0, 9.0, 1.0], 2);
        assert_eq!(means, vec![3.0, 6.5, 5.0]);
        assert!(sma(&[1.0, 2.0], 3).is_empty());
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let data = vec![2.0, 4.0, 6.0, 8.0];
        let result = ema(&data, 3);

        assert_eq!(result.len(), 2);
        assert!((result[0] - 4.0).abs() < 1e-9);
        // multiplier = 0.5 -> (8 - 4) * 0.5 + 4 = 6
        assert!((result[1] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_short_history_returns_mean() {
        let result = ema(&[1.0, 3.0], 10);
        assert_eq!(result, vec![2.0]);
        assert!(ema(&[], 10).is_empty());
    }

    #[test]
    fn test_ema_increases_with_uptrend() {
        let result = ema(&rising_closes(), 5);
        assert!(result.last().unwrap() > result.first().unwrap());
    }

    #[test]
    fn test_atr_of_constant_ranges() {
        // Every true range is 3 points (high - low, gaps are smaller)
        let values = atr(&stepping_bars(), 14);
        assert_eq!(values.len(), 6);
        assert!(values.iter().all(|v| (v - 3.0).abs() < 1e-9));
    }

    #[test]
    fn test_atr_insufficient_data() {
        let bars = stepping_bars()[..5].to_vec();
        assert_eq!(atr(&bars, 14).len(), 0);
        assert_eq!(latest_atr(&bars, 14), None);
    }

    #[test]
    fn test_atr_flat_market_stays_positive() {
        let flat: Vec<Bar> = stepping_bars()
            .into_iter()
            .map(|b| Bar {
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                ..b
            })
            .collect();
        let value = latest_atr(&flat, 14).unwrap();
        assert!(value > 0.0);
        assert_eq!(value, MIN_ATR);
    }

    #[test]
    fn test_atr_increases_with_volatility() {
        let calm = latest_atr(&stepping_bars(), 5).unwrap();
        let wide: Vec<Bar> = stepping_bars()
            .into_iter()
            .map(|b| Bar {
                high: b.high + 4.0,
                low: b.low - 4.0,
                ..b
            })
            .collect();
        assert!(latest_atr(&wide, 5).unwrap() > calm);
    }

    #[test]
    fn test_directional_score_sign_follows_trend() {
        let up = stepping_bars();
        let down = reversed(&up);

        let up_score = directional_score(&up, 3, 8, 14).unwrap();
        let down_score = directional_score(&down, 3, 8, 14).unwrap();

        assert!(up_score > 0.0, "uptrend score {up_score}");
        assert!(down_score < 0.0, "downtrend score {down_score}");
        assert!(up_score <= 1.0 && down_score >= -1.0);
    }

    #[test]
    fn test_directional_score_needs_atr_window() {
        let bars = stepping_bars()[..10].to_vec();
        assert_eq!(directional_score(&bars, 3, 8, 14), None);
    }
}
