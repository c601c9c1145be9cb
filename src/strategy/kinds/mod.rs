//! The closed set of strategy kinds.

pub mod atr_stop;
pub mod bollinger;
pub mod ichimoku;
pub mod ma_crossover;
pub mod macd;
pub mod range_trading;
pub mod rsi;
pub mod stochastic;

pub use atr_stop::{AtrStop, AtrStopParams, AtrStopState};
pub use bollinger::{Bollinger, BollingerParams};
pub use ichimoku::{Ichimoku, IchimokuParams};
pub use ma_crossover::{MaCrossover, MaCrossoverParams};
pub use macd::{Macd, MacdParams};
pub use range_trading::{RangeTrading, RangeTradingParams};
pub use rsi::{Rsi, RsiParams};
pub use stochastic::{Stochastic, StochasticParams};
