//! Paper exchange for dry runs
//!
//! Market orders fill immediately and in full at the latest market price,
//! against in-memory balances. Nothing rests on the book.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::{ExchangeClient, ExchangeKind};
use crate::domain::{LotSize, OpenOrder, OrderRequest, OrderResponse, OrderSide, OrderStatus};
use crate::error::{BotError, Result};
use crate::market_data::MarketDataSource;

#[derive(Debug)]
struct PaperBook {
    base: Decimal,
    quote: Decimal,
    next_order_id: u64,
    /// Fills by client order id
    orders: HashMap<String, OrderResponse>,
}

pub struct PaperExchange {
    market_data: Arc<dyn MarketDataSource>,
    base_asset: String,
    quote_asset: String,
    lot: LotSize,
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(
        market_data: Arc<dyn MarketDataSource>,
        base_asset: &str,
        quote_asset: &str,
        base: Decimal,
        quote: Decimal,
    ) -> Self {
        Self {
            market_data,
            base_asset: base_asset.to_ascii_uppercase(),
            quote_asset: quote_asset.to_ascii_uppercase(),
            lot: LotSize::new(dec!(0.00001), dec!(0.00001)),
            book: Mutex::new(PaperBook {
                base,
                quote,
                next_order_id: 1,
                orders: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Paper
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let price = self.market_data.latest_price(&request.symbol).await?;
        if price <= Decimal::ZERO {
            return Err(BotError::InvalidMarketData(format!(
                "no usable price for {}",
                request.symbol
            )));
        }

        let quote_qty = request.quantity * price;
        let mut book = self.book.lock().await;
        match request.side {
            OrderSide::Buy => {
                if quote_qty > book.quote {
                    return Err(BotError::OrderRejected(format!(
                        "insufficient {}: need {}, have {}",
                        self.quote_asset, quote_qty, book.quote
                    )));
                }
                book.quote -= quote_qty;
                book.base += request.quantity;
            }
            OrderSide::Sell => {
                if request.quantity > book.base {
                    return Err(BotError::OrderRejected(format!(
                        "insufficient {}: need {}, have {}",
                        self.base_asset, request.quantity, book.base
                    )));
                }
                book.base -= request.quantity;
                book.quote += quote_qty;
            }
        }

        let order_id = book.next_order_id;
        book.next_order_id += 1;
        info!(
            "[PAPER] {} {} {} @ {} (balances: {} {}, {} {})",
            request.side,
            request.quantity,
            request.symbol,
            price,
            book.base,
            self.base_asset,
            book.quote,
            self.quote_asset
        );

        let response = OrderResponse {
            order_id,
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            status: OrderStatus::Filled,
            executed_qty: request.quantity,
            cummulative_quote_qty: quote_qty,
        };
        book.orders
            .insert(request.client_order_id.clone(), response.clone());
        Ok(response)
    }

    async fn order_status(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderResponse>> {
        Ok(self.book.lock().await.orders.get(client_order_id).cloned())
    }

    async fn list_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }

    async fn cancel_order(&self, _symbol: &str, order_id: u64) -> Result<()> {
        Err(BotError::OrderRejected(format!("unknown order {}", order_id)))
    }

    async fn get_free_balance(&self, asset: &str) -> Result<Decimal> {
        let book = self.book.lock().await;
        if asset.eq_ignore_ascii_case(&self.base_asset) {
            Ok(book.base)
        } else if asset.eq_ignore_ascii_case(&self.quote_asset) {
            Ok(book.quote)
        } else {
            Ok(Decimal::ZERO)
        }
    }

    async fn lot_size(&self, _symbol: &str) -> Result<LotSize> {
        Ok(self.lot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MockMarketDataSource;

    fn exchange(quote: Decimal) -> PaperExchange {
        let mut market = MockMarketDataSource::new();
        market
            .expect_latest_price()
            .returning(|_| Ok(dec!(50000)));
        PaperExchange::new(Arc::new(market), "BTC", "USDT", Decimal::ZERO, quote)
    }

    #[tokio::test]
    async fn test_buy_then_sell_moves_balances() {
        let ex = exchange(dec!(1000));
        let buy = ex
            .place_order(&OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.006)))
            .await
            .unwrap();
        assert!(buy.is_filled());
        assert_eq!(buy.avg_fill_price(), Some(dec!(50000)));
        assert_eq!(ex.get_free_balance("USDT").await.unwrap(), dec!(700));
        assert_eq!(ex.get_free_balance("btc").await.unwrap(), dec!(0.006));

        let sell = ex
            .place_order(&OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.006)))
            .await
            .unwrap();
        assert_eq!(sell.order_id, buy.order_id + 1);
        assert_eq!(ex.get_free_balance("USDT").await.unwrap(), dec!(1000));
        assert_eq!(ex.get_free_balance("BTC").await.unwrap(), Decimal::ZERO);

        let found = ex
            .order_status("BTCUSDT", &buy.client_order_id)
            .await
            .unwrap();
        assert_eq!(found, Some(buy));
        assert!(ex.order_status("BTCUSDT", "cb-unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overspend_is_rejected_without_change() {
        let ex = exchange(dec!(100));
        let err = ex
            .place_order(&OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01)))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::OrderRejected(_)));
        assert!(!err.is_transient());
        assert_eq!(ex.get_free_balance("USDT").await.unwrap(), dec!(100));
        assert!(ex.list_open_orders("BTCUSDT").await.unwrap().is_empty());
    }
}
