use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::{BotError, Result};
use crate::strategy::indicators::{rolling_max, rolling_min, sma};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// Stochastic oscillator: %K above overbought sells, below oversold buys.
pub struct Stochastic;

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticParams {
    pub k_period: usize,
    pub d_period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

const EPSILON: f64 = 1e-9;

impl SignalStrategy for Stochastic {
    type Params = StochasticParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<StochasticParams> {
        let reader = ParamReader::new("stochastic", params);
        let p = StochasticParams {
            k_period: reader.period("k_period", 14, 1)?,
            d_period: reader.period("d_period", 3, 1)?,
            overbought: reader.number("overbought", 80.0, 0.0, 100.0)?,
            oversold: reader.number("oversold", 20.0, 0.0, 100.0)?,
        };
        if p.oversold >= p.overbought {
            return Err(BotError::Validation(format!(
                "stochastic: oversold ({}) must be less than overbought ({})",
                p.oversold, p.overbought
            )));
        }
        Ok(p)
    }

    fn compute(snapshot: &MarketSnapshot, p: &StochasticParams, _state: &()) -> Evaluation<()> {
        if snapshot.len() < p.k_period + p.d_period - 1 {
            return Evaluation::hold();
        }
        let closes = snapshot.closes();
        let lowest = rolling_min(&snapshot.lows(), p.k_period);
        let highest = rolling_max(&snapshot.highs(), p.k_period);

        let k: Vec<f64> = closes
            .iter()
            .zip(lowest.iter().zip(&highest))
            .filter_map(|(close, (lo, hi))| {
                let (lo, hi) = ((*lo)?, (*hi)?);
                Some(100.0 * (close - lo) / (hi - lo + EPSILON))
            })
            .collect();
        // %D must be defined for the reading to count
        let d_ready = sma(&k, p.d_period).last().copied().flatten().is_some();
        let Some(&last_k) = k.last().filter(|_| d_ready) else {
            return Evaluation::hold();
        };

        let signal = if last_k > p.overbought {
            Signal::Sell
        } else if last_k < p.oversold {
            Signal::Buy
        } else {
            Signal::Hold
        };
        Evaluation::new(signal, ())
    }
}
