use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::{LotSize, OpenOrder, OrderRequest, OrderResponse};
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    #[default]
    Binance,
    Paper,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Paper => "paper",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = BotError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "binance" | "live" => Ok(Self::Binance),
            "paper" | "dry_run" | "dry-run" => Ok(Self::Paper),
            other => Err(BotError::Validation(format!(
                "invalid exchange '{}'; expected binance|paper",
                other
            ))),
        }
    }
}

/// Spot venue used by the order gateway.
///
/// Errors follow the crate convention: transient failures (rate limits,
/// 5xx, timeouts) report `is_transient() == true` and are retried by the
/// caller; anything else is final for that call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    fn is_dry_run(&self) -> bool;

    /// Submit a market order and return the venue's report
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse>;

    /// Look up an order by the client id it was submitted with. `None`
    /// when the venue has no such order.
    async fn order_status(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderResponse>>;

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<()>;

    async fn get_free_balance(&self, asset: &str) -> Result<Decimal>;

    async fn lot_size(&self, symbol: &str) -> Result<LotSize>;

    /// Cancel every resting order on `symbol`. Individual failures are
    /// logged and skipped; the count of cancelled orders is returned.
    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<usize> {
        let open = self.list_open_orders(symbol).await?;
        let mut cancelled = 0;
        for order in open {
            match self.cancel_order(symbol, order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("Failed to cancel order {}: {}", order.order_id, e),
            }
        }
        if cancelled > 0 {
            info!("Cancelled {} open orders on {}", cancelled, symbol);
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exchange_kind() {
        assert_eq!("Binance".parse::<ExchangeKind>().unwrap(), ExchangeKind::Binance);
        assert_eq!("dry-run".parse::<ExchangeKind>().unwrap(), ExchangeKind::Paper);
        assert!("kraken".parse::<ExchangeKind>().is_err());
    }
}
