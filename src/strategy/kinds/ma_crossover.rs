use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::{BotError, Result};
use crate::strategy::indicators::{last_cross, sma};
use crate::strategy::traits::{Evaluation, ParamReader, SignalStrategy};

/// Fast simple moving average crossing the slow one
pub struct MaCrossover;

#[derive(Debug, Clone, PartialEq)]
pub struct MaCrossoverParams {
    pub fast: usize,
    pub slow: usize,
}

impl SignalStrategy for MaCrossover {
    type Params = MaCrossoverParams;
    type State = ();

    fn validate(params: &ParamMap) -> Result<MaCrossoverParams> {
        let reader = ParamReader::new("ma_crossover", params);
        let p = MaCrossoverParams {
            fast: reader.period("fast", 10, 1)?,
            slow: reader.period("slow", 50, 2)?,
        };
        if p.fast >= p.slow {
            return Err(BotError::Validation(format!(
                "ma_crossover: fast ({}) must be shorter than slow ({})",
                p.fast, p.slow
            )));
        }
        Ok(p)
    }

    fn compute(snapshot: &MarketSnapshot, p: &MaCrossoverParams, _state: &()) -> Evaluation<()> {
        let closes = snapshot.closes();
        let signal = match last_cross(&sma(&closes, p.fast), &sma(&closes, p.slow)) {
            Some(true) => Signal::Buy,
            Some(false) => Signal::Sell,
            None => Signal::Hold,
        };
        Evaluation::new(signal, ())
    }
}
