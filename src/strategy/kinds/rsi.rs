use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::{BotError, Result};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// Mean-reversion on the relative strength index
pub struct Rsi;

#[derive(Debug, Clone, PartialEq)]
pub struct RsiParams {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

/// RSI of the last bar using simple rolling means of gains and losses.
/// No losses in the window means RSI 100.
pub fn rsi_value(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let window = &closes[closes.len() - period - 1..];
    let (mut gains, mut losses) = (0.0, 0.0);
    for pair in window.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

impl SignalStrategy for Rsi {
    type Params = RsiParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<RsiParams> {
        let reader = ParamReader::new("rsi", params);
        let p = RsiParams {
            period: reader.period("period", 14, 1)?,
            overbought: reader.number("overbought", 70.0, 0.0, 100.0)?,
            oversold: reader.number("oversold", 30.0, 0.0, 100.0)?,
        };
        if p.oversold >= p.overbought {
            return Err(BotError::Validation(format!(
                "rsi: oversold ({}) must be less than overbought ({})",
                p.oversold, p.overbought
            )));
        }
        Ok(p)
    }

    fn compute(snapshot: &MarketSnapshot, p: &RsiParams, _state: &()) -> Evaluation<()> {
        let Some(value) = rsi_value(&snapshot.closes(), p.period) else {
            return Evaluation::hold();
        };
        let signal = if value > p.overbought {
            Signal::Sell
        } else if value < p.oversold {
            Signal::Buy
        } else {
            Signal::Hold
        };
        Evaluation::new(signal, ())
    }
}
