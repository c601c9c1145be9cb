//! Binance public REST market data (klines and ticker price)

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::MarketDataSource;
use crate::domain::{Candle, MarketSnapshot};
use crate::error::{BotError, Result};

/// Binance caps a klines request at 1000 rows
const MAX_KLINES: u32 = 1000;

#[derive(Clone)]
pub struct BinanceMarketData {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

impl BinanceMarketData {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("candlebot/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::Internal(format!("failed to build market data client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_server_error() {
            return Err(BotError::MarketDataUnavailable(format!(
                "GET {} failed: status={}",
                path, status
            )));
        }
        if !status.is_success() {
            return Err(BotError::from_status(status.as_u16(), &format!("GET {}", path), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| BotError::InvalidMarketData(format!("invalid JSON from {}: {}", path, e)))
    }
}

/// One kline row: `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`.
/// Rows that do not parse are skipped.
pub(crate) fn parse_kline_row(row: &Value) -> Option<Candle> {
    let row = row.as_array()?;
    if row.len() < 7 {
        return None;
    }
    let num = |v: &Value| -> Option<f64> {
        match v {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };
    Some(Candle {
        open_time: row[0].as_i64()?,
        open: num(&row[1])?,
        high: num(&row[2])?,
        low: num(&row[3])?,
        close: num(&row[4])?,
        volume: num(&row[5])?,
        close_time: row[6].as_i64()?,
    })
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot> {
        let body = self
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.clamp(1, MAX_KLINES).to_string()),
                ],
            )
            .await?;

        let rows = body
            .as_array()
            .ok_or_else(|| BotError::InvalidMarketData("klines response is not an array".into()))?;
        let candles: Vec<Candle> = rows.iter().filter_map(parse_kline_row).collect();
        debug!("Fetched {} {} klines for {}", candles.len(), interval, symbol);

        let last_price = match candles.last() {
            Some(_) => self.latest_price(symbol).await?,
            None => Decimal::ZERO,
        };
        Ok(MarketSnapshot::new(symbol, interval, candles, last_price))
    }

    async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        let body = self
            .get_json("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let ticker: TickerPrice = serde_json::from_value(body)?;
        Decimal::from_str(&ticker.price)
            .map_err(|e| BotError::InvalidMarketData(format!("bad price '{}': {}", ticker.price, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1_700_000_000_000i64, "35000.1", "35100.0", "34900.5", "35050.0", "12.5",
            1_700_014_399_999i64, "438000.0", 1234, "6.0", "210000.0", "0"
        ]);
        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.high, 35100.0);
        assert_eq!(candle.close, 35050.0);
        assert_eq!(candle.close_time, 1_700_014_399_999);
    }

    #[test]
    fn test_parse_kline_row_rejects_garbage() {
        assert!(parse_kline_row(&json!([1, "x", "1", "1", "1", "1"])).is_none());
        assert!(parse_kline_row(&json!([1, "1"])).is_none());
        assert!(parse_kline_row(&json!([1, "1", "1", "1", "1", "1"])).is_none());
        assert!(parse_kline_row(&json!({"open": 1})).is_none());
    }
}
