//! Strategy kind registry
//!
//! The set of kinds is closed. Each kind maps to one [`SignalStrategy`]
//! implementation through an exhaustive match, so adding a kind is a
//! compile error until it is wired everywhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::identity::{StrategySpec, COMMON_PARAMS};
use super::kinds::{AtrStop, Bollinger, Ichimoku, MaCrossover, Macd, RangeTrading, Rsi, Stochastic};
use super::traits::SignalStrategy;
use super::worker::{SignalWorker, WorkerContext, WorkerHandle};
use crate::domain::ParamMap;
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Rsi,
    Macd,
    Bollinger,
    MaCrossover,
    Stochastic,
    AtrStop,
    RangeTrading,
    Ichimoku,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 8] = [
        StrategyKind::Rsi,
        StrategyKind::Macd,
        StrategyKind::Bollinger,
        StrategyKind::MaCrossover,
        StrategyKind::Stochastic,
        StrategyKind::AtrStop,
        StrategyKind::RangeTrading,
        StrategyKind::Ichimoku,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsi => "rsi",
            Self::Macd => "macd",
            Self::Bollinger => "bollinger",
            Self::MaCrossover => "ma_crossover",
            Self::Stochastic => "stochastic",
            Self::AtrStop => "atr_stop",
            Self::RangeTrading => "range_trading",
            Self::Ichimoku => "ichimoku",
        }
    }

    /// Check parameters without starting anything. Keys shared by all kinds
    /// are stripped first.
    pub fn validate(self, params: &ParamMap) -> Result<()> {
        let own = indicator_params(params);
        match self {
            Self::Rsi => Rsi::validate(&own).map(drop),
            Self::Macd => Macd::validate(&own).map(drop),
            Self::Bollinger => Bollinger::validate(&own).map(drop),
            Self::MaCrossover => MaCrossover::validate(&own).map(drop),
            Self::Stochastic => Stochastic::validate(&own).map(drop),
            Self::AtrStop => AtrStop::validate(&own).map(drop),
            Self::RangeTrading => RangeTrading::validate(&own).map(drop),
            Self::Ichimoku => Ichimoku::validate(&own).map(drop),
        }
    }

    /// Build and start the worker for `spec`
    pub fn spawn(self, spec: StrategySpec, ctx: WorkerContext) -> Result<WorkerHandle> {
        match self {
            Self::Rsi => SignalWorker::<Rsi>::new(spec, ctx).map(SignalWorker::spawn),
            Self::Macd => SignalWorker::<Macd>::new(spec, ctx).map(SignalWorker::spawn),
            Self::Bollinger => SignalWorker::<Bollinger>::new(spec, ctx).map(SignalWorker::spawn),
            Self::MaCrossover => SignalWorker::<MaCrossover>::new(spec, ctx).map(SignalWorker::spawn),
            Self::Stochastic => SignalWorker::<Stochastic>::new(spec, ctx).map(SignalWorker::spawn),
            Self::AtrStop => SignalWorker::<AtrStop>::new(spec, ctx).map(SignalWorker::spawn),
            Self::RangeTrading => {
                SignalWorker::<RangeTrading>::new(spec, ctx).map(SignalWorker::spawn)
            }
            Self::Ichimoku => SignalWorker::<Ichimoku>::new(spec, ctx).map(SignalWorker::spawn),
        }
    }
}

/// Parameters minus the worker-level keys (`timeframe`, sizing)
pub fn indicator_params(params: &ParamMap) -> ParamMap {
    params
        .iter()
        .filter(|(k, _)| !COMMON_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl FromStr for StrategyKind {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "rsi" => Self::Rsi,
            "macd" => Self::Macd,
            "bollinger" | "bollinger_bands" | "bbands" | "bb" => Self::Bollinger,
            "ma_crossover" | "sma_crossover" | "ma_cross" | "moving_average_crossover" => {
                Self::MaCrossover
            }
            "stochastic" | "stoch" | "stochastic_oscillator" => Self::Stochastic,
            "atr_stop" | "atr" | "supertrend" | "atr_trailing_stop" => Self::AtrStop,
            "range_trading" | "range" | "range_trade" => Self::RangeTrading,
            "ichimoku" | "ichimoku_cloud" => Self::Ichimoku,
            _ => return Err(BotError::UnknownStrategy(s.trim().to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
