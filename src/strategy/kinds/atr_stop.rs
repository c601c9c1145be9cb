//! ATR trailing stop (supertrend style) with flip hysteresis.
//!
//! Bands are `mid ± multiplier * ATR`, ratcheted like a supertrend. A trend
//! flip needs `consecutive_candles` closes beyond the opposite band. After a
//! flip the next `lock_candles` bars are not considered for flips, and a bar
//! whose close gaps more than `gap_threshold` from the previous close never
//! counts toward one. Bands keep updating through locked and gap bars.
//!
//! Only closed bars are folded, each exactly once: the state remembers the
//! last processed open time, so repeated polls over the same snapshot leave
//! it unchanged and a forming bar is judged on its final close.

use serde::{Deserialize, Serialize};

use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::Result;
use crate::strategy::indicators::{ema, true_range};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

pub struct AtrStop;

#[derive(Debug, Clone, PartialEq)]
pub struct AtrStopParams {
    pub period: usize,
    pub multiplier: f64,
    pub consecutive_candles: u32,
    pub atr_min_threshold: f64,
    pub lock_candles: u32,
    pub gap_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrStopState {
    pub in_uptrend: bool,
    pub final_upper: Option<f64>,
    pub final_lower: Option<f64>,
    pub below_count: u32,
    pub above_count: u32,
    pub lock_counter: u32,
    pub last_close: Option<f64>,
    /// Open time (ms) of the newest bar already folded into the state
    pub last_processed: Option<i64>,
}

impl Default for AtrStopState {
    fn default() -> Self {
        Self {
            in_uptrend: true,
            final_upper: None,
            final_lower: None,
            below_count: 0,
            above_count: 0,
            lock_counter: 0,
            last_close: None,
            last_processed: None,
        }
    }
}

impl SignalStrategy for AtrStop {
    type Params = AtrStopParams;
    type State = AtrStopState;

    fn validate(params: &ParamMap) -> Result<AtrStopParams> {
        let reader = ParamReader::new("atr_stop", params);
        Ok(AtrStopParams {
            period: reader.period("period", 14, 1)?,
            multiplier: reader.number("multiplier", 2.0, 0.0, 100.0)?,
            consecutive_candles: reader.period("consecutive_candles", 2, 1)? as u32,
            atr_min_threshold: reader.number("atr_min_threshold", 0.0, 0.0, f64::MAX)?,
            lock_candles: reader.period("lock_candles", 2, 0)? as u32,
            gap_threshold: reader.number("gap_threshold", 0.03, 0.0, f64::MAX)?,
        })
    }

    fn compute(
        snapshot: &MarketSnapshot,
        p: &AtrStopParams,
        state: &AtrStopState,
    ) -> Evaluation<AtrStopState> {
        let bars = snapshot.closed_candles();
        let n = bars.len();
        if n < p.period || n == 0 {
            return Evaluation::new(Signal::Hold, state.clone());
        }

        let highs: Vec<f64> = bars.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = bars.iter().map(|c| c.low).collect();
        let closes: Vec<f64> = bars.iter().map(|c| c.close).collect();
        let atr = ema(&true_range(&highs, &lows, &closes), p.period);
        if atr[n - 1] < p.atr_min_threshold {
            return Evaluation::new(Signal::Hold, state.clone());
        }

        let band = |i: usize| {
            let mid = (highs[i] + lows[i]) / 2.0;
            (mid + p.multiplier * atr[i], mid - p.multiplier * atr[i])
        };

        let mut s = state.clone();
        let start = match s.last_processed {
            Some(t) => bars
                .iter()
                .position(|c| c.open_time > t)
                .unwrap_or(n),
            None => {
                let (upper, lower) = band(0);
                s.final_upper.get_or_insert(upper);
                s.final_lower.get_or_insert(lower);
                s.last_close.get_or_insert(closes[0]);
                s.last_processed = Some(bars[0].open_time);
                1
            }
        };

        for i in start..n {
            let close = closes[i];
            let (basic_upper, basic_lower) = band(i);
            let prev_close = s.last_close.unwrap_or(close);
            let prev_upper = s.final_upper.unwrap_or(basic_upper);
            let prev_lower = s.final_lower.unwrap_or(basic_lower);

            let gapped = prev_close > 0.0 && (close - prev_close).abs() / prev_close > p.gap_threshold;

            if s.lock_counter > 0 {
                s.lock_counter -= 1;
            } else if gapped {
                // ignored for flip purposes
            } else if s.in_uptrend {
                if close < prev_lower {
                    s.below_count += 1;
                    if s.below_count >= p.consecutive_candles {
                        s.in_uptrend = false;
                        s.below_count = 0;
                        s.above_count = 0;
                        s.lock_counter = p.lock_candles;
                    }
                } else {
                    s.below_count = 0;
                }
            } else if close > prev_upper {
                s.above_count += 1;
                if s.above_count >= p.consecutive_candles {
                    s.in_uptrend = true;
                    s.below_count = 0;
                    s.above_count = 0;
                    s.lock_counter = p.lock_candles;
                }
            } else {
                s.above_count = 0;
            }

            s.final_upper = Some(if basic_upper < prev_upper || prev_close > prev_upper {
                basic_upper
            } else {
                prev_upper
            });
            s.final_lower = Some(if basic_lower > prev_lower || prev_close < prev_lower {
                basic_lower
            } else {
                prev_lower
            });
            s.last_close = Some(close);
            s.last_processed = Some(bars[i].open_time);
        }

        let signal = match (state.in_uptrend, s.in_uptrend) {
            (false, true) => Signal::Buy,
            (true, false) => Signal::Sell,
            _ => Signal::Hold,
        };
        Evaluation::new(signal, s)
    }
}
