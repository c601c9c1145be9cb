//! Core strategy traits and types
//!
//! A strategy kind is a pair of pure functions: `validate` turns raw
//! parameters into a typed form once, and `compute` maps a market snapshot
//! plus the previous indicator state to a signal and the next state.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

use crate::domain::{MarketSnapshot, ParamMap, Signal};
use crate::error::{BotError, Result};

pub trait SignalStrategy: Send + Sync + 'static {
    type Params: Clone + Debug + Send + Sync + 'static;
    /// Hysteresis carried between polls. Stateless kinds use `()`.
    type State: Serialize + DeserializeOwned + Default + Clone + PartialEq + Debug + Send + Sync + 'static;

    fn validate(params: &ParamMap) -> Result<Self::Params>;

    fn compute(snapshot: &MarketSnapshot, params: &Self::Params, state: &Self::State)
        -> Evaluation<Self::State>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<S> {
    pub signal: Signal,
    pub state: S,
}

impl<S> Evaluation<S> {
    pub fn new(signal: Signal, state: S) -> Self {
        Self { signal, state }
    }
}

impl<S: Default> Evaluation<S> {
    pub fn hold() -> Self {
        Self::new(Signal::Hold, S::default())
    }
}

/// The persisted record of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: DeserializeOwned + Default"
))]
pub struct StrategyState<S> {
    /// Last BUY or SELL emitted. HOLD never overwrites it.
    #[serde(default)]
    pub last_signal: Signal,
    #[serde(default)]
    pub indicator: S,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<S: Default> Default for StrategyState<S> {
    fn default() -> Self {
        Self {
            last_signal: Signal::Hold,
            indicator: S::default(),
            updated_at: None,
        }
    }
}

/// Typed accessors over a parameter map. Missing keys take the default; a
/// present key of the wrong type or out of range is an error.
pub struct ParamReader<'a> {
    kind: &'static str,
    params: &'a ParamMap,
}

impl<'a> ParamReader<'a> {
    pub fn new(kind: &'static str, params: &'a ParamMap) -> Self {
        Self { kind, params }
    }

    fn invalid(&self, key: &str, why: impl std::fmt::Display) -> BotError {
        BotError::Validation(format!("{}: parameter '{}' {}", self.kind, key, why))
    }

    pub fn period(&self, key: &str, default: usize, min: usize) -> Result<usize> {
        let value = match self.params.get(key) {
            None | Some(Value::Null) => return Ok(default),
            Some(v) => v,
        };
        let n = value
            .as_u64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| self.invalid(key, format!("must be a non-negative integer, got {}", value)))?;
        let n = usize::try_from(n).map_err(|_| self.invalid(key, "is too large"))?;
        if n < min {
            return Err(self.invalid(key, format!("must be >= {}, got {}", min, n)));
        }
        Ok(n)
    }

    pub fn number(&self, key: &str, default: f64, min: f64, max: f64) -> Result<f64> {
        let value = match self.params.get(key) {
            None | Some(Value::Null) => return Ok(default),
            Some(v) => v,
        };
        let f = value
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| self.invalid(key, format!("must be a number, got {}", value)))?;
        if f < min || f > max {
            return Err(self.invalid(key, format!("must lie in [{}, {}], got {}", min, max, f)));
        }
        Ok(f)
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.invalid(key, format!("must be a boolean, got {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_reader_defaults_and_errors() {
        let mut params = ParamMap::new();
        params.insert("period".into(), json!(21));
        params.insert("fast".into(), json!(12.0));
        params.insert("bad".into(), json!("x"));
        let reader = ParamReader::new("test", &params);

        assert_eq!(reader.period("period", 14, 1).unwrap(), 21);
        assert_eq!(reader.period("fast", 3, 1).unwrap(), 12);
        assert_eq!(reader.period("missing", 14, 1).unwrap(), 14);
        assert!(reader.period("bad", 14, 1).is_err());
        assert!(reader.period("period", 14, 50).is_err());
        assert!(reader.number("period", 0.0, 0.0, 10.0).is_err());
        assert!(reader.flag("period", false).is_err());
    }

    #[test]
    fn test_state_record_tolerates_missing_fields() {
        let record: StrategyState<u32> = serde_json::from_value(json!({"last_signal": "BUY"})).unwrap();
        assert_eq!(record.last_signal, Signal::Buy);
        assert_eq!(record.indicator, 0);
        assert!(record.updated_at.is_none());
    }
}
