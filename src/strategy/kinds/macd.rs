use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::{BotError, Result};
use crate::strategy::indicators::{ema, last_cross};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// MACD line crossing its signal line
pub struct Macd;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl SignalStrategy for Macd {
    type Params = MacdParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<MacdParams> {
        let reader = ParamReader::new("macd", params);
        let p = MacdParams {
            fast: reader.period("fast", 12, 1)?,
            slow: reader.period("slow", 26, 1)?,
            signal: reader.period("signal", 9, 1)?,
        };
        if p.fast >= p.slow {
            return Err(BotError::Validation(format!(
                "macd: fast ({}) must be shorter than slow ({})",
                p.fast, p.slow
            )));
        }
        Ok(p)
    }

    fn compute(snapshot: &MarketSnapshot, p: &MacdParams, _state: &()) -> Evaluation<()> {
        let closes = snapshot.closes();
        if closes.len() < p.slow.max(p.signal).max(2) {
            return Evaluation::hold();
        }
        let fast = ema(&closes, p.fast);
        let slow = ema(&closes, p.slow);
        let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal_line = ema(&line, p.signal);

        let line: Vec<Option<f64>> = line.into_iter().map(Some).collect();
        let signal_line: Vec<Option<f64>> = signal_line.into_iter().map(Some).collect();
        let signal = match last_cross(&line, &signal_line) {
            Some(true) => Signal::Buy,
            Some(false) => Signal::Sell,
            None => Signal::Hold,
        };
        Evaluation::new(signal, ())
    }
}
