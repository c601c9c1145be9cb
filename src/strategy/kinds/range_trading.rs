use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::Result;
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// Trades the edges of a sideways range and stays out of trends.
///
/// Over the last `period` bars the range is `[lowest low, highest high]`.
/// When the range is wider than `max_range_pct` of the low the market is
/// trending and the signal is HOLD. Otherwise a close in the bottom
/// `buy_threshold` percent of the range buys and one in the top
/// `sell_threshold` percent sells.
pub struct RangeTrading;

#[derive(Debug, Clone, PartialEq)]
pub struct RangeTradingParams {
    pub period: usize,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub max_range_pct: f64,
}

impl SignalStrategy for RangeTrading {
    type Params = RangeTradingParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<RangeTradingParams> {
        let reader = ParamReader::new("range_trading", params);
        Ok(RangeTradingParams {
            period: reader.period("period", 20, 2)?,
            buy_threshold: reader.number("buy_threshold", 10.0, 0.0, 100.0)?,
            sell_threshold: reader.number("sell_threshold", 10.0, 0.0, 100.0)?,
            max_range_pct: reader.number("max_range_pct", 10.0, 0.0, 1000.0)?,
        })
    }

    fn compute(snapshot: &MarketSnapshot, p: &RangeTradingParams, _state: &()) -> Evaluation<()> {
        if snapshot.len() < p.period {
            return Evaluation::hold();
        }
        let window = &snapshot.candles[snapshot.len() - p.period..];
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let Some(close) = window.last().map(|c| c.close) else {
            return Evaluation::hold();
        };
        if lowest <= 0.0 {
            return Evaluation::hold();
        }

        let range = highest - lowest;
        if range / lowest * 100.0 > p.max_range_pct {
            return Evaluation::hold();
        }

        let buy_level = lowest + p.buy_threshold / 100.0 * range;
        let sell_level = highest - p.sell_threshold / 100.0 * range;
        let signal = if close <= buy_level {
            Signal::Buy
        } else if close >= sell_level {
            Signal::Sell
        } else {
            Signal::Hold
        };
        Evaluation::new(signal, ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::kinds::test_support::{candle, snapshot};

    fn ranging(last_close: f64) -> MarketSnapshot {
        let mut candles: Vec<_> = (0..19)
            .map(|i| candle(i, 105.0, 95.0, 100.0))
            .collect();
        candles.push(candle(19, 105.0, 95.0, last_close));
        snapshot(candles)
    }

    #[test]
    fn test_range_edges() {
        let p = RangeTrading::validate(&ParamMap::new()).unwrap();
        // range 95..105 is 10.5% of the low; allow it
        let p = RangeTradingParams {
            max_range_pct: 12.0,
            ..p
        };
        assert_eq!(RangeTrading::compute(&ranging(95.5), &p, &()).signal, Signal::Buy);
        assert_eq!(RangeTrading::compute(&ranging(104.5), &p, &()).signal, Signal::Sell);
        assert_eq!(RangeTrading::compute(&ranging(100.0), &p, &()).signal, Signal::Hold);
    }

    #[test]
    fn test_trending_market_holds() {
        let p = RangeTrading::validate(&ParamMap::new()).unwrap();
        assert_eq!(RangeTrading::compute(&ranging(95.5), &p, &()).signal, Signal::Hold);
    }
}
