use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One OHLCV bar.
///
/// Prices are `f64` because they only feed indicator math; anything that
/// reaches an order goes through [`MarketSnapshot::last_price`] as a `Decimal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in epoch milliseconds
    pub open_time: i64,
    /// Last millisecond of the bar; a bar is still forming until then
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// A time-ordered candle series plus the latest traded price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub interval: String,
    /// Oldest first
    pub candles: Vec<Candle>,
    pub last_price: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(symbol: &str, interval: &str, mut candles: Vec<Candle>, last_price: Decimal) -> Self {
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            candles,
            last_price,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Bars that had closed when the snapshot was fetched. Exchanges
    /// return the forming bar last, with a provisional close.
    pub fn closed_candles(&self) -> &[Candle] {
        let now = self.fetched_at.timestamp_millis();
        let closed = self.candles.partition_point(|c| c.close_time < now);
        &self.candles[..closed]
    }

    /// Compact JSON view handed to the decision oracle.
    pub fn summary(&self, recent: usize) -> serde_json::Value {
        let start = self.candles.len().saturating_sub(recent);
        let recent_bars: Vec<_> = self.candles[start..]
            .iter()
            .map(|c| {
                json!({
                    "open_time": DateTime::from_timestamp_millis(c.open_time)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    "open": c.open,
                    "high": c.high,
                    "low": c.low,
                    "close": c.close,
                    "volume": c.volume,
                })
            })
            .collect();

        let closes = self.closes();
        let change_pct = match (closes.first(), closes.last()) {
            (Some(first), Some(last)) if *first > 0.0 => (last - first) / first * 100.0,
            _ => 0.0,
        };

        json!({
            "symbol": self.symbol,
            "interval": self.interval,
            "current_price_usd": self.last_price.to_f64().unwrap_or(0.0),
            "candles_available": self.candles.len(),
            "period_change_pct": change_pct,
            "period_high": self.highs().into_iter().fold(f64::MIN, f64::max),
            "period_low": self.lows().into_iter().fold(f64::MAX, f64::min),
            "recent_candles": recent_bars,
            "fetched_at": self.fetched_at.to_rfc3339(),
        })
    }
}

/// Free balances of the two assets of the traded pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletBalances {
    /// e.g. BTC
    pub base: Decimal,
    /// e.g. USDT
    pub quote: Decimal,
}

impl WalletBalances {
    pub fn new(base: Decimal, quote: Decimal) -> Self {
        Self { base, quote }
    }

    /// Total wallet value expressed in the quote asset
    pub fn total_in_quote(&self, price: Decimal) -> Decimal {
        self.quote + self.base * price
    }
}
