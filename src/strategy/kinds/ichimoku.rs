use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::Result;
use crate::strategy::indicators::{rolling_max, rolling_min};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// Ichimoku cloud scored on four conditions: tenkan/kijun cross, price
/// against the cloud, cloud colour, and chikou against the past close.
/// Three or more agreeing conditions (with fewer than three opposing) give
/// a signal.
pub struct Ichimoku;

#[derive(Debug, Clone, PartialEq)]
pub struct IchimokuParams {
    pub tenkan_period: usize,
    pub kijun_period: usize,
    pub senkou_span_b_period: usize,
    pub displacement: usize,
}

fn midline(highs: &[f64], lows: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling_max(highs, period)
        .into_iter()
        .zip(rolling_min(lows, period))
        .map(|(h, l)| Some((h? + l?) / 2.0))
        .collect()
}

impl SignalStrategy for Ichimoku {
    type Params = IchimokuParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<IchimokuParams> {
        let reader = ParamReader::new("ichimoku", params);
        Ok(IchimokuParams {
            tenkan_period: reader.period("tenkan_period", 9, 1)?,
            kijun_period: reader.period("kijun_period", 26, 1)?,
            senkou_span_b_period: reader.period("senkou_span_b_period", 52, 1)?,
            displacement: reader.period("displacement", 26, 1)?,
        })
    }

    fn compute(snapshot: &MarketSnapshot, p: &IchimokuParams, _state: &()) -> Evaluation<()> {
        let n = snapshot.len();
        if n < p.senkou_span_b_period + p.displacement || n < 2 {
            return Evaluation::hold();
        }
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let closes = snapshot.closes();

        let tenkan = midline(&highs, &lows, p.tenkan_period);
        let kijun = midline(&highs, &lows, p.kijun_period);
        let span_b = midline(&highs, &lows, p.senkou_span_b_period);

        let last = n - 1;
        let shifted = last - p.displacement;
        let values = (
            tenkan[last - 1],
            kijun[last - 1],
            tenkan[last],
            kijun[last],
            tenkan[shifted],
            kijun[shifted],
            span_b[shifted],
        );
        let (Some(t_prev), Some(k_prev), Some(t_last), Some(k_last), Some(t_s), Some(k_s), Some(span_b)) =
            values
        else {
            return Evaluation::hold();
        };
        // Cloud at the current bar was projected `displacement` bars ago
        let span_a = (t_s + k_s) / 2.0;
        let price = closes[last];
        let past = closes[shifted];

        let top = span_a.max(span_b);
        let bottom = span_a.min(span_b);

        let bullish = [
            t_prev < k_prev && t_last > k_last,
            price > top,
            span_a > span_b,
            price > past,
        ]
        .iter()
        .filter(|c| **c)
        .count();
        let bearish = [
            t_prev > k_prev && t_last < k_last,
            price < bottom,
            span_a < span_b,
            price < past,
        ]
        .iter()
        .filter(|c| **c)
        .count();

        let signal = if bullish >= 3 && bearish < 3 {
            Signal::Buy
        } else if bearish >= 3 && bullish < 3 {
            Signal::Sell
        } else {
            Signal::Hold
        };
        Evaluation::new(signal, ())
    }
}
