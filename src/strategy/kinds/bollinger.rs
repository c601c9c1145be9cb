use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::Result;
use crate::strategy::indicators::{rolling_std, sma};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// Close outside the bands: above the upper band sells, below the lower buys.
pub struct Bollinger;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerParams {
    pub period: usize,
    pub stddev: f64,
}

impl SignalStrategy for Bollinger {
    type Params = BollingerParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<BollingerParams> {
        let reader = ParamReader::new("bollinger", params);
        Ok(BollingerParams {
            period: reader.period("period", 20, 2)?,
            stddev: reader.number("stddev", 2.0, 0.0, 10.0)?,
        })
    }

    fn compute(snapshot: &MarketSnapshot, p: &BollingerParams, _state: &()) -> Evaluation<()> {
        let closes = snapshot.closes();
        let (Some(Some(mid)), Some(Some(std)), Some(close)) = (
            sma(&closes, p.period).last().copied(),
            rolling_std(&closes, p.period).last().copied(),
            closes.last().copied(),
        ) else {
            return Evaluation::hold();
        };

        let upper = mid + p.stddev * std;
        let lower = mid - p.stddev * std;
        let signal = if close > upper {
            Signal::Sell
        } else if close < lower {
            Signal::Buy
        } else {
            Signal::Hold
        };
        Evaluation::new(signal, ())
    }
}
