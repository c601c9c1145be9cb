//! Decisions returned by the decision oracle.
//!
//! Oracle output is untrusted. [`Decision::from_value`] accepts the loose
//! shapes the oracle tends to produce (string numbers, action aliases,
//! `strategy` instead of `strategy_name`) and rejects anything it cannot
//! interpret; callers treat a rejected item as HOLD.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::OrderSide;
use crate::error::{BotError, Result};

/// Strategy parameters, keyed by parameter name. Sorted so iteration order
/// is canonical.
pub type ParamMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    Hold,
    DirectOrder,
    Strategy,
}

impl DecisionAction {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "HOLD" | "WAIT" | "NONE" | "NO_ACTION" => Some(DecisionAction::Hold),
            "DIRECT_ORDER" | "DIRECT" | "ORDER" | "MARKET_ORDER" | "TRADE" => {
                Some(DecisionAction::DirectOrder)
            }
            "STRATEGY" | "USE_STRATEGY" | "START_STRATEGY" | "RUN_STRATEGY" => {
                Some(DecisionAction::Strategy)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionAction::Hold => write!(f, "HOLD"),
            DecisionAction::DirectOrder => write!(f, "DIRECT_ORDER"),
            DecisionAction::Strategy => write!(f, "STRATEGY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<OrderSide>,
    /// Absolute base-asset quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Decimal>,
    /// Fraction of the relevant balance, must lie in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: ParamMap,
    /// Free-form reasoning carried through to the artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl Decision {
    pub fn hold() -> Self {
        Self {
            action: DecisionAction::Hold,
            side: None,
            size: None,
            size_pct: None,
            strategy_name: None,
            params: ParamMap::new(),
            analysis: None,
        }
    }

    pub fn hold_because(reason: impl Into<String>) -> Self {
        Self {
            analysis: Some(reason.into()),
            ..Self::hold()
        }
    }

    pub fn direct(side: OrderSide, size: Decimal) -> Self {
        Self {
            action: DecisionAction::DirectOrder,
            side: Some(side),
            size: Some(size),
            ..Self::hold()
        }
    }

    pub fn direct_pct(side: OrderSide, size_pct: Decimal) -> Self {
        Self {
            action: DecisionAction::DirectOrder,
            side: Some(side),
            size_pct: Some(size_pct),
            ..Self::hold()
        }
    }

    pub fn strategy(name: &str, params: ParamMap) -> Self {
        Self {
            action: DecisionAction::Strategy,
            strategy_name: Some(name.to_string()),
            params,
            ..Self::hold()
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == DecisionAction::Hold
    }

    /// Parse one untrusted decision object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| BotError::Validation(format!("decision is not an object: {}", value)))?;

        let raw_action = obj
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::Validation("decision has no action".to_string()))?;
        let action = DecisionAction::parse(raw_action)
            .ok_or_else(|| BotError::Validation(format!("unknown action '{}'", raw_action)))?;

        let analysis = obj
            .get("analysis")
            .or_else(|| obj.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let side = match obj.get("side") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                OrderSide::parse(s)
                    .ok_or_else(|| BotError::Validation(format!("invalid side '{}'", s)))?,
            ),
            Some(other) => return Err(BotError::Validation(format!("invalid side {}", other))),
        };

        let size = decimal_field(obj, "size")?;
        let size_pct = decimal_field(obj, "size_pct")?;

        let strategy_name = obj
            .get("strategy_name")
            .or_else(|| obj.get("strategy"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let params = match obj.get("params").or_else(|| obj.get("parameters")) {
            None | Some(Value::Null) => ParamMap::new(),
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(other) => {
                return Err(BotError::Validation(format!(
                    "params must be an object, got {}",
                    other
                )))
            }
        };

        let decision = Decision {
            action,
            side,
            size,
            size_pct,
            strategy_name,
            params,
            analysis,
        };
        decision.validate()?;
        Ok(decision)
    }

    /// Shape checks. Range checks on `size_pct` happen during sizing, where
    /// an out-of-range value downgrades to HOLD.
    pub fn validate(&self) -> Result<()> {
        match self.action {
            DecisionAction::Hold => Ok(()),
            DecisionAction::DirectOrder => {
                if self.side.is_none() {
                    return Err(BotError::Validation("DIRECT_ORDER without side".to_string()));
                }
                match (self.size, self.size_pct) {
                    (None, None) => Err(BotError::Validation(
                        "DIRECT_ORDER needs size or size_pct".to_string(),
                    )),
                    (Some(size), _) if size <= Decimal::ZERO => Err(BotError::Validation(
                        format!("DIRECT_ORDER size must be positive, got {}", size),
                    )),
                    _ => Ok(()),
                }
            }
            DecisionAction::Strategy => {
                if self.strategy_name.is_none() {
                    return Err(BotError::Validation("STRATEGY without strategy_name".to_string()));
                }
                Ok(())
            }
        }
    }
}

fn decimal_field(obj: &serde_json::Map<String, Value>, key: &str) -> Result<Option<Decimal>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => value_to_decimal(v)
            .map(Some)
            .ok_or_else(|| BotError::Validation(format!("{} is not a number: {}", key, v))),
    }
}

/// Numbers and numeric strings, including scientific notation
pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64))
        }
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        _ => None,
    }
}

/// JSON number for a decimal parameter
pub fn decimal_to_value(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return Value::from(i);
        }
    }
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_direct_order() {
        let d = Decision::from_value(&json!({
            "action": "DIRECT_ORDER",
            "side": "buy",
            "size_pct": 0.3,
            "analysis": "breakout"
        }))
        .unwrap();
        assert_eq!(d.action, DecisionAction::DirectOrder);
        assert_eq!(d.side, Some(OrderSide::Buy));
        assert_eq!(d.size_pct, Some(dec!(0.3)));
        assert_eq!(d.analysis.as_deref(), Some("breakout"));
    }

    #[test]
    fn test_parse_strategy_aliases() {
        let d = Decision::from_value(&json!({
            "action": "use_strategy",
            "strategy": "rsi",
            "parameters": {"period": 14}
        }))
        .unwrap();
        assert_eq!(d.action, DecisionAction::Strategy);
        assert_eq!(d.strategy_name.as_deref(), Some("rsi"));
        assert_eq!(d.params.get("period"), Some(&json!(14)));
    }

    #[test]
    fn test_malformed_items_are_rejected() {
        assert!(Decision::from_value(&json!("BUY")).is_err());
        assert!(Decision::from_value(&json!({"side": "BUY"})).is_err());
        assert!(Decision::from_value(&json!({"action": "YOLO"})).is_err());
        assert!(Decision::from_value(&json!({"action": "DIRECT_ORDER", "size": 1})).is_err());
        assert!(Decision::from_value(&json!({"action": "DIRECT_ORDER", "side": "BUY"})).is_err());
        assert!(
            Decision::from_value(&json!({"action": "DIRECT_ORDER", "side": "BUY", "size": "lots"}))
                .is_err()
        );
        assert!(Decision::from_value(&json!({"action": "STRATEGY"})).is_err());
        assert!(
            Decision::from_value(&json!({"action": "STRATEGY", "strategy_name": "rsi", "params": [1]}))
                .is_err()
        );
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let d = Decision::from_value(&json!({
            "action": "DIRECT_ORDER",
            "side": "SELL",
            "size": "0.0015"
        }))
        .unwrap();
        assert_eq!(d.size, Some(dec!(0.0015)));
        assert_eq!(value_to_decimal(&json!("1e-3")), Some(dec!(0.001)));
    }

    #[test]
    fn test_decimal_to_value() {
        assert_eq!(decimal_to_value(dec!(14)), json!(14));
        assert_eq!(decimal_to_value(dec!(0.25)), json!(0.25));
    }
}
