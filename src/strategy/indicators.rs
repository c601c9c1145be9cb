//! Indicator math over plain `f64` series.
//!
//! Every function returns a series aligned with its input. Positions without
//! enough history hold `None`.

/// Simple moving average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average, `alpha = 2 / (span + 1)`, seeded with the
/// first value (no bias adjustment).
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Rolling sample standard deviation (n - 1 denominator)
pub fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period < 2 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
        out[i] = Some(var.sqrt());
    }
    out
}

pub fn rolling_max(values: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |w| w.iter().copied().fold(f64::MIN, f64::max))
}

pub fn rolling_min(values: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |w| w.iter().copied().fold(f64::MAX, f64::min))
}

fn rolling(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        out[i] = Some(f(&values[i + 1 - period..=i]));
    }
    out
}

/// True range per bar. The first bar has no previous close and uses
/// `high - low`.
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    (0..n)
        .map(|i| {
            let hl = highs[i] - lows[i];
            if i == 0 {
                hl
            } else {
                let prev = closes[i - 1];
                hl.max((highs[i] - prev).abs()).max((lows[i] - prev).abs())
            }
        })
        .collect()
}

/// Classify the last step of two series: `Some(true)` when `a` crossed above
/// `b`, `Some(false)` when it crossed below, `None` otherwise.
pub fn last_cross(a: &[Option<f64>], b: &[Option<f64>]) -> Option<bool> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (pa, pb, la, lb) = (a[n - 2]?, b[n - 2]?, a[n - 1]?, b[n - 1]?);
    if pa < pb && la > lb {
        Some(true)
    } else if pa > pb && la < lb {
        Some(false)
    } else {
        None
    }
}
