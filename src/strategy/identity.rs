//! Stable identities for (strategy kind, parameters) pairs.

use serde_json::Value;
use std::str::FromStr;

use super::registry::StrategyKind;
use crate::domain::{Decision, DecisionAction, ParamMap};
use crate::error::{BotError, Result};

/// Keys understood by every kind: they steer the worker, not the indicator.
pub const COMMON_PARAMS: &[&str] = &["timeframe", "size_pct", "size"];

/// Known misspellings seen in oracle output
const KEY_ALIASES: &[(&str, &str)] = &[
    ("ipliplier", "multiplier"),
    ("multipler", "multiplier"),
    ("std_dev", "stddev"),
    ("interval", "timeframe"),
];

/// Canonical parameter map: trimmed lower-case keys, aliases resolved,
/// integral floats as integers so `14` and `14.0` compare equal.
pub fn normalize_params(raw: &ParamMap) -> ParamMap {
    raw.iter()
        .map(|(k, v)| {
            let key = k.trim().to_ascii_lowercase();
            let key = KEY_ALIASES
                .iter()
                .find(|(alias, _)| *alias == key)
                .map(|(_, canonical)| canonical.to_string())
                .unwrap_or(key);
            (key, normalize_value(v))
        })
        .collect()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::String(s) => Value::String(s.trim().to_string()),
        _ => value.clone(),
    }
}

/// `kind|{json}` over the normalized parameters. The map is sorted and
/// JSON escapes every key and value, so distinct maps never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyIdentity(String);

impl StrategyIdentity {
    pub fn new(kind: StrategyKind, params: &ParamMap) -> Self {
        let canonical: serde_json::Map<String, Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self(format!("{}|{}", kind.as_str(), Value::Object(canonical)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StrategyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated request to run one strategy
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySpec {
    pub kind: StrategyKind,
    pub params: ParamMap,
    pub identity: StrategyIdentity,
}

impl StrategySpec {
    pub fn new(kind: StrategyKind, raw_params: &ParamMap) -> Self {
        let params = normalize_params(raw_params);
        let identity = StrategyIdentity::new(kind, &params);
        Self {
            kind,
            params,
            identity,
        }
    }

    pub fn from_decision(decision: &Decision) -> Result<Self> {
        if decision.action != DecisionAction::Strategy {
            return Err(BotError::Validation(format!(
                "expected a STRATEGY decision, got {}",
                decision.action
            )));
        }
        let name = decision
            .strategy_name
            .as_deref()
            .ok_or_else(|| BotError::Validation("STRATEGY without strategy_name".to_string()))?;
        let kind = StrategyKind::from_str(name)?;
        Ok(Self::new(kind, &decision.params))
    }

    /// Kline interval requested through the `timeframe` param
    pub fn timeframe(&self) -> Option<&str> {
        self.params
            .get("timeframe")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> ParamMap {
        v.as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identity_is_order_and_format_insensitive() {
        let a = StrategySpec::new(
            StrategyKind::Rsi,
            &params(json!({"period": 14, "overbought": 70, "oversold": 30})),
        );
        let b = StrategySpec::new(
            StrategyKind::Rsi,
            &params(json!({" Oversold": 30.0, "PERIOD": 14.0, "overbought": 70})),
        );
        assert_eq!(a.identity, b.identity);
        assert_eq!(
            a.identity.as_str(),
            r#"rsi|{"overbought":70,"oversold":30,"period":14}"#
        );
    }

    #[test]
    fn test_identity_distinguishes_params_and_kind() {
        let a = StrategySpec::new(StrategyKind::Rsi, &params(json!({"period": 14})));
        let b = StrategySpec::new(StrategyKind::Rsi, &params(json!({"period": 21})));
        let c = StrategySpec::new(StrategyKind::Bollinger, &params(json!({"period": 14})));
        assert_ne!(a.identity, b.identity);
        assert_ne!(a.identity, c.identity);
    }

    #[test]
    fn test_separator_characters_in_values_do_not_collide() {
        let a = StrategySpec::new(
            StrategyKind::Rsi,
            &params(json!({"period": 14, "timeframe": "4h_x-1"})),
        );
        let b = StrategySpec::new(
            StrategyKind::Rsi,
            &params(json!({"period": 14, "timeframe": "4h", "x": 1})),
        );
        assert_ne!(a.identity, b.identity);

        let c = StrategySpec::new(StrategyKind::Rsi, &params(json!({"a_b": "c"})));
        let d = StrategySpec::new(StrategyKind::Rsi, &params(json!({"a": "b_c"})));
        assert_ne!(c.identity, d.identity);
    }

    #[test]
    fn test_typo_keys_are_mapped() {
        let spec = StrategySpec::new(
            StrategyKind::AtrStop,
            &params(json!({"ipliplier": 2.5, "timeframe": " 1h "})),
        );
        assert_eq!(spec.params.get("multiplier"), Some(&json!(2.5)));
        assert_eq!(spec.timeframe(), Some("1h"));
    }

    #[test]
    fn test_from_decision() {
        let d = Decision::strategy("supertrend", params(json!({"period": 10})));
        let spec = StrategySpec::from_decision(&d).unwrap();
        assert_eq!(spec.kind, StrategyKind::AtrStop);

        let unknown = Decision::strategy("martingale", ParamMap::new());
        assert!(matches!(
            StrategySpec::from_decision(&unknown),
            Err(BotError::UnknownStrategy(_))
        ));
        assert!(StrategySpec::from_decision(&Decision::hold()).is_err());
    }
}
