//! Market data collaborators
//!
//! Workers and the orchestrator only see [`MarketDataSource`]. A short or
//! empty series is a valid answer; strategies turn it into HOLD.

pub mod binance;

pub use binance::BinanceMarketData;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::MarketSnapshot;
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Latest `limit` klines of `interval` for `symbol`, oldest first
    async fn fetch_snapshot(&self, symbol: &str, interval: &str, limit: u32)
        -> Result<MarketSnapshot>;

    /// Last traded price
    async fn latest_price(&self, symbol: &str) -> Result<Decimal>;
}
