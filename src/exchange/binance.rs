//! Binance spot REST client (signed endpoints)
//!
//! Requests are signed with HMAC-SHA256 over the query string, with the API
//! key in the `X-MBX-APIKEY` header.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ExchangeClient, ExchangeKind};
use crate::config::ExchangeCredentials;
use crate::domain::{LotSize, OpenOrder, OrderRequest, OrderResponse, OrderSide, OrderStatus};
use crate::error::{BotError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceClient {
    http: Client,
    base_url: String,
    credentials: ExchangeCredentials,
    recv_window_ms: u64,
    lot_sizes: RwLock<HashMap<String, LotSize>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: u64,
    #[serde(default)]
    client_order_id: String,
    symbol: String,
    side: String,
    status: String,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default)]
    cummulative_quote_qty: Decimal,
    #[serde(default)]
    price: Decimal,
    #[serde(default)]
    orig_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    asset: String,
    free: Decimal,
}

#[derive(Debug, Deserialize)]
struct Account {
    balances: Vec<AccountBalance>,
}

impl BinanceClient {
    pub fn new(
        base_url: &str,
        credentials: ExchangeCredentials,
        recv_window_ms: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("candlebot/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::Internal(format!("failed to build exchange HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms,
            lot_sizes: RwLock::new(HashMap::new()),
        })
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|e| BotError::Auth(format!("invalid API secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-mbx-apikey"),
            HeaderValue::from_str(&self.credentials.api_key)
                .map_err(|e| BotError::Auth(format!("invalid API key header: {}", e)))?,
        );
        Ok(headers)
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<Value> {
        let mut query = encode_query(params);
        let mut req;
        if signed {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                self.recv_window_ms,
                Utc::now().timestamp_millis()
            ));
            let signature = self.sign(&query)?;
            let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
            req = self.http.request(method.clone(), &url);
            req = req.headers(self.auth_headers()?);
        } else {
            let url = if query.is_empty() {
                format!("{}{}", self.base_url, path)
            } else {
                format!("{}{}?{}", self.base_url, path, query)
            };
            req = self.http.request(method.clone(), &url);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(BotError::from_status(
                status.as_u16(),
                &format!("{} {}", method, path),
                &text,
            ));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| BotError::Internal(format!("invalid JSON from {}: {}", path, e)))
    }
}

/// `k=v&k=v` with values URL-encoded, in the given order
pub(crate) fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn map_order(raw: RawOrder) -> Result<OrderResponse> {
    let side = OrderSide::parse(&raw.side)
        .ok_or_else(|| BotError::Internal(format!("unknown order side '{}'", raw.side)))?;
    let status = OrderStatus::parse(&raw.status)
        .ok_or_else(|| BotError::Internal(format!("unknown order status '{}'", raw.status)))?;
    Ok(OrderResponse {
        order_id: raw.order_id,
        client_order_id: raw.client_order_id,
        symbol: raw.symbol,
        side,
        status,
        executed_qty: raw.executed_qty,
        cummulative_quote_qty: raw.cummulative_quote_qty,
    })
}

/// Binance answers a lookup of an order it never accepted with code -2013
fn is_unknown_order(detail: &str) -> bool {
    detail.contains("\"code\":-2013")
}

/// LOT_SIZE filter of the first symbol in an exchangeInfo response
pub(crate) fn parse_lot_size(info: &Value) -> Option<LotSize> {
    let filters = info.get("symbols")?.get(0)?.get("filters")?.as_array()?;
    let lot = filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some("LOT_SIZE"))?;
    let step = lot.get("stepSize")?.as_str()?.parse().ok()?;
    let min = lot.get("minQty")?.as_str()?.parse().ok()?;
    Some(LotSize::new(step, min))
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Binance
    }

    fn is_dry_run(&self) -> bool {
        false
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let params = [
            ("symbol", request.symbol.clone()),
            ("side", request.side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", request.quantity.normalize().to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        let body = self
            .request_json(Method::POST, "/api/v3/order", &params, true)
            .await?;
        let order = map_order(serde_json::from_value(body)?)?;
        info!(
            "Order {} {} {} -> {} (executed {})",
            order.order_id, order.side, request.quantity, order.status, order.executed_qty
        );
        Ok(order)
    }

    async fn order_status(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderResponse>> {
        let result = self
            .request_json(
                Method::GET,
                "/api/v3/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("origClientOrderId", client_order_id.to_string()),
                ],
                true,
            )
            .await;
        match result {
            Ok(body) => Ok(Some(map_order(serde_json::from_value(body)?)?)),
            Err(BotError::OrderRejected(detail)) if is_unknown_order(&detail) => {
                debug!("No order with client id {} on {}", client_order_id, symbol);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let body = self
            .request_json(
                Method::GET,
                "/api/v3/openOrders",
                &[("symbol", symbol.to_string())],
                true,
            )
            .await?;
        let raw: Vec<RawOrder> = serde_json::from_value(body)?;
        raw.into_iter()
            .map(|o| {
                let side = OrderSide::parse(&o.side)
                    .ok_or_else(|| BotError::Internal(format!("unknown order side '{}'", o.side)))?;
                Ok(OpenOrder {
                    order_id: o.order_id,
                    symbol: o.symbol,
                    side,
                    price: o.price,
                    orig_qty: o.orig_qty,
                })
            })
            .collect()
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<()> {
        self.request_json(
            Method::DELETE,
            "/api/v3/order",
            &[
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
            true,
        )
        .await?;
        debug!("Cancelled order {} on {}", order_id, symbol);
        Ok(())
    }

    async fn get_free_balance(&self, asset: &str) -> Result<Decimal> {
        let body = self
            .request_json(Method::GET, "/api/v3/account", &[], true)
            .await?;
        let account: Account = serde_json::from_value(body)?;
        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO))
    }

    async fn lot_size(&self, symbol: &str) -> Result<LotSize> {
        if let Some(lot) = self.lot_sizes.read().await.get(symbol) {
            return Ok(*lot);
        }
        let body = self
            .request_json(
                Method::GET,
                "/api/v3/exchangeInfo",
                &[("symbol", symbol.to_string())],
                false,
            )
            .await?;
        let lot = parse_lot_size(&body)
            .ok_or_else(|| BotError::Internal(format!("no LOT_SIZE filter for {}", symbol)))?;
        self.lot_sizes.write().await.insert(symbol.to_string(), lot);
        Ok(lot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use zeroize::Zeroizing;

    fn client() -> BinanceClient {
        BinanceClient::new(
            "https://testnet.binance.vision/",
            ExchangeCredentials {
                api_key: "key".to_string(),
                api_secret: Zeroizing::new(
                    "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string(),
                ),
            },
            5000,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_signature_matches_reference_vector() {
        // Example request from the Binance API documentation
        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client().sign(payload).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_unknown_order_detection() {
        let missing = BotError::from_status(
            400,
            "GET /api/v3/order",
            r#"{"code":-2013,"msg":"Order does not exist."}"#,
        );
        match missing {
            BotError::OrderRejected(detail) => assert!(is_unknown_order(&detail)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!is_unknown_order(r#"{"code":-2010,"msg":"Account has insufficient balance"}"#));
    }

    #[test]
    fn test_encode_query() {
        let q = encode_query(&[("symbol", "BTCUSDT".into()), ("newClientOrderId", "a b".into())]);
        assert_eq!(q, "symbol=BTCUSDT&newClientOrderId=a%20b");
    }

    #[test]
    fn test_map_order_response() {
        let raw: RawOrder = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "orderId": 28,
            "clientOrderId": "cb-1",
            "transactTime": 1507725176595i64,
            "price": "0.00000000",
            "origQty": "0.00600000",
            "executedQty": "0.00600000",
            "cummulativeQuoteQty": "300.00000000",
            "status": "FILLED",
            "type": "MARKET",
            "side": "BUY"
        }))
        .unwrap();
        let order = map_order(raw).unwrap();
        assert!(order.is_filled());
        assert_eq!(order.avg_fill_price(), Some(dec!(50000)));
    }

    #[test]
    fn test_parse_lot_size() {
        let info = json!({"symbols": [{"symbol": "BTCUSDT", "filters": [
            {"filterType": "PRICE_FILTER", "tickSize": "0.01"},
            {"filterType": "LOT_SIZE", "minQty": "0.00001000", "maxQty": "9000", "stepSize": "0.00001000"}
        ]}]});
        let lot = parse_lot_size(&info).unwrap();
        assert_eq!(lot.step_size, dec!(0.00001));
        assert_eq!(lot.min_qty, dec!(0.00001));
        assert!(parse_lot_size(&json!({"symbols": []})).is_none());
    }
}
