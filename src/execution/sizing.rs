//! Order sizing: percentage-of-balance requests become absolute quantities.

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::{
    decimal_to_value, value_to_decimal, Decision, DecisionAction, OrderSide, ParamMap,
    WalletBalances,
};

/// Resolve `size_pct` into `size`.
///
/// BUY: `quote_balance * pct / price`. SELL: `base_balance * pct`.
/// A percentage outside `[0, 1]` downgrades the decision to HOLD. On a
/// STRATEGY decision the percentage moves into the params instead, where it
/// sizes the worker's future BUYs.
pub fn resolve_size(decision: Decision, wallet: &WalletBalances, price: Decimal) -> Decision {
    if let Some(pct) = decision.size_pct {
        if pct < Decimal::ZERO || pct > Decimal::ONE {
            warn!("size_pct {} outside [0, 1], downgrading to HOLD", pct);
            return Decision::hold_because(format!("size_pct {} outside [0, 1]", pct));
        }
    }

    match decision.action {
        DecisionAction::Hold => decision,
        DecisionAction::Strategy => {
            let mut decision = decision;
            if let Some(pct) = decision.size_pct.take() {
                decision
                    .params
                    .insert("size_pct".to_string(), decimal_to_value(pct));
            }
            decision
        }
        DecisionAction::DirectOrder => {
            let Some(side) = decision.side else {
                return Decision::hold_because("DIRECT_ORDER without side");
            };
            let size = match (decision.size_pct, decision.size) {
                (Some(pct), _) => match side {
                    OrderSide::Buy => {
                        if price <= Decimal::ZERO {
                            warn!("Cannot size BUY from balance without a price");
                            return Decision::hold_because("no price for percentage BUY");
                        }
                        wallet.quote * pct / price
                    }
                    OrderSide::Sell => wallet.base * pct,
                },
                (None, Some(size)) => size,
                (None, None) => return Decision::hold_because("DIRECT_ORDER without size"),
            };
            if size <= Decimal::ZERO {
                return Decision::hold_because("resolved size is zero");
            }
            Decision {
                size: Some(size),
                size_pct: None,
                ..decision
            }
        }
    }
}

/// Size of a BUY raised by a signal worker: `size_pct` of the quote balance,
/// else an explicit `size` param, else the configured default.
pub fn strategy_buy_size(
    params: &ParamMap,
    wallet: &WalletBalances,
    price: Decimal,
    default_size: Decimal,
) -> Decimal {
    if let Some(pct) = params.get("size_pct").and_then(value_to_decimal) {
        if pct > Decimal::ZERO && pct <= Decimal::ONE && price > Decimal::ZERO {
            return wallet.quote * pct / price;
        }
        warn!("Ignoring unusable size_pct {} in strategy params", pct);
    }
    params
        .get("size")
        .and_then(value_to_decimal)
        .filter(|s| *s > Decimal::ZERO)
        .unwrap_or(default_size)
}
