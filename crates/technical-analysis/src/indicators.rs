use analysis_core::Bar;

/// Floor applied to ATR so that any non-empty history yields a strictly positive value.
pub const MIN_ATR: f64 = 1e-10;

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(sum / period as f64);
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period` values.
///
/// When fewer than `period` values exist the mean of what is available is
/// returned as a single value, so a non-empty input never yields an empty result.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    if data.len() < period {
        return vec![data.iter().sum::<f64>() / data.len() as f64];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result.push(prev);

    for value in &data[period..] {
        prev = (value - prev) * multiplier + prev;
        result.push(prev);
    }

    result
}

/// True range of every bar after the first.
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let high_low = w[1].high - w[1].low;
            let high_close = (w[1].high - w[0].close).abs();
            let low_close = (w[1].low - w[0].close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect()
}

/// Average True Range (Wilder smoothing)
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let trs = true_ranges(bars);

    let mut atr_values = Vec::with_capacity(trs.len() - period + 1);
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    atr_values.push(atr.max(MIN_ATR));

    for tr in &trs[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(atr.max(MIN_ATR));
    }

    atr_values
}

/// Latest ATR value, if the history covers at least one full window.
pub fn latest_atr(bars: &[Bar], period: usize) -> Option<f64> {
    atr(bars, period).last().copied()
}

/// Directional score in `[-1, 1]`.
///
/// The fast/slow EMA spread is normalised by ATR and squashed with `tanh`:
/// positive means the closes are trending up, negative down. Returns `None`
/// when the ATR window cannot be formed.
pub fn directional_score(
    bars: &[Bar],
    fast_period: usize,
    slow_period: usize,
    atr_period: usize,
) -> Option<f64> {
    let atr = latest_atr(bars, atr_period)?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let fast = *ema(&closes, fast_period).last()?;
    let slow = *ema(&closes, slow_period).last()?;

    let score = ((fast - slow) / atr).tanh();
    if score.is_finite() {
        Some(score)
    } else {
        Some(0.0)
    }
}
