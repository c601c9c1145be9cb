//! Order execution gateway
//!
//! The only writer of the position record. Every order runs under the
//! position lock: quantize, cancel opposite-side resting orders, submit
//! with bounded retry, and mutate the position only on a FILLED report.
//! A retry after a transient failure first looks the order up by client id:
//! the failed attempt may have reached the venue and filled.
//! Once shutdown begins no new submission starts; one already holding the
//! lock runs to completion, retries included.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::sizing::strategy_buy_size;
use super::RetryPolicy;
use crate::control::notifier::{Notification, Notifier};
use crate::coordination::ShutdownToken;
use crate::domain::{
    Decision, DecisionAction, OrderRequest, OrderResponse, OrderSide, Signal, WalletBalances,
};
use crate::error::{BotError, OrderError, Result};
use crate::exchange::ExchangeClient;
use crate::persistence::{Position, PositionGuard, PositionStore, SellOutcome};
use crate::strategy::SignalEvent;

/// A completed fill
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: u64,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Strategy BUY size when the params carry neither size nor size_pct
    pub default_strategy_size: Decimal,
}

pub struct OrderGateway {
    exchange: Arc<dyn ExchangeClient>,
    positions: Arc<PositionStore>,
    retry: RetryPolicy,
    shutdown: ShutdownToken,
    config: GatewayConfig,
    notifier: Option<Arc<dyn Notifier>>,
}

impl OrderGateway {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        positions: Arc<PositionStore>,
        retry: RetryPolicy,
        shutdown: ShutdownToken,
        config: GatewayConfig,
    ) -> Self {
        Self {
            exchange,
            positions,
            retry,
            shutdown,
            config,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn positions(&self) -> &Arc<PositionStore> {
        &self.positions
    }

    pub fn exchange(&self) -> &Arc<dyn ExchangeClient> {
        &self.exchange
    }

    /// Free balances of both assets, with retry
    pub async fn balances(&self) -> Result<WalletBalances> {
        let exchange = &self.exchange;
        let base_asset = self.config.base_asset.as_str();
        let quote_asset = self.config.quote_asset.as_str();
        let base = self
            .retry
            .run("base balance", None, move || exchange.get_free_balance(base_asset))
            .await?;
        let quote = self
            .retry
            .run("quote balance", None, move || exchange.get_free_balance(quote_asset))
            .await?;
        Ok(WalletBalances::new(base, quote))
    }

    /// Place a market order for `size` and record the fill.
    pub async fn place(&self, side: OrderSide, size: Decimal, source: &str) -> Result<Fill> {
        if self.shutdown.is_shutdown_requested() {
            return Err(BotError::ShuttingDown);
        }
        let mut guard = self.positions.lock().await;
        self.place_locked(&mut guard, side, size, source).await
    }

    async fn place_locked(
        &self,
        guard: &mut PositionGuard<'_>,
        side: OrderSide,
        size: Decimal,
        source: &str,
    ) -> Result<Fill> {
        // Re-check: shutdown may have begun while waiting for the lock
        if self.shutdown.is_shutdown_requested() {
            return Err(BotError::ShuttingDown);
        }

        let exchange = &self.exchange;
        let symbol = self.config.symbol.as_str();

        let lot = self
            .retry
            .run("lot size", None, move || exchange.lot_size(symbol))
            .await?;
        let quantity = lot.quantize(size);
        if !lot.is_tradable(quantity) {
            warn!(
                "{} {} truncates to {}, below minimum lot {}",
                side, size, quantity, lot.min_qty
            );
            return Err(OrderError::BelowMinimumLot {
                quantity,
                min_qty: lot.min_qty,
            }
            .into());
        }

        self.cancel_opposite_orders(side).await;

        let request = OrderRequest::market(symbol, side, quantity);
        let attempts = self.retry.max_attempts;
        let response = self.submit(&request).await.map_err(|e| {
            error!("{} {} {} failed: {}", side, quantity, symbol, e);
            if e.is_transient() {
                BotError::Order(OrderError::MaxRetriesExceeded { attempts })
            } else {
                e
            }
        });
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.notify(Notification::OrderFailed {
                    side,
                    reason: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        if !response.is_filled() {
            warn!(
                "Order {} ended {} (executed {}), position unchanged",
                response.order_id, response.status, response.executed_qty
            );
            let err = OrderError::NotFilled {
                order_id: response.order_id.to_string(),
                status: response.status.to_string(),
            };
            self.notify(Notification::OrderFailed {
                side,
                reason: err.to_string(),
            })
            .await;
            return Err(err.into());
        }

        let price = response.avg_fill_price().unwrap_or_default();
        let fill = Fill {
            order_id: response.order_id,
            side,
            quantity: response.executed_qty,
            price,
        };

        match side {
            OrderSide::Buy => {
                if let Some(prev) = guard.position() {
                    info!("Overwriting open position {} @ {}", prev.size, prev.entry_price);
                }
                guard
                    .replace(Position {
                        side: OrderSide::Buy,
                        size: fill.quantity,
                        entry_price: price,
                        opened_at: Utc::now(),
                    })
                    .await?;
                info!("BUY filled: {} @ {}, position open", fill.quantity, price);
            }
            OrderSide::Sell => match guard.apply_sell(fill.quantity).await? {
                SellOutcome::NoPosition => {
                    info!("SELL filled: {} @ {}, no tracked position", fill.quantity, price)
                }
                SellOutcome::Closed(closed) => info!(
                    "SELL filled: {} @ {}, closed position opened at {}",
                    fill.quantity, price, closed.entry_price
                ),
                SellOutcome::Reduced { remaining } => info!(
                    "SELL filled: {} @ {}, {} remaining",
                    fill.quantity, price, remaining
                ),
            },
        }

        self.notify(Notification::OrderFilled {
            side,
            quantity: fill.quantity,
            price,
            source: source.to_string(),
        })
        .await;
        Ok(fill)
    }

    /// Submit with retry. Every attempt after the first checks whether an
    /// earlier one was accepted before sending the order again.
    async fn submit(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let exchange = &self.exchange;
        let symbol = self.config.symbol.as_str();
        let attempted = AtomicBool::new(false);
        let attempted = &attempted;

        self.retry
            .run("place order", None, move || async move {
                if attempted.swap(true, Ordering::SeqCst) {
                    if let Some(existing) = exchange
                        .order_status(symbol, &request.client_order_id)
                        .await?
                    {
                        info!(
                            "Order {} already accepted as {} ({}), not resubmitting",
                            request.client_order_id, existing.order_id, existing.status
                        );
                        return Ok(existing);
                    }
                }
                exchange.place_order(request).await
            })
            .await
    }

    async fn cancel_opposite_orders(&self, side: OrderSide) {
        let exchange = &self.exchange;
        let symbol = self.config.symbol.as_str();
        let open = match self
            .retry
            .run("list open orders", None, move || exchange.list_open_orders(symbol))
            .await
        {
            Ok(open) => open,
            Err(e) => {
                warn!("Could not list open orders: {}", e);
                return;
            }
        };

        for order in open.iter().filter(|o| o.side == side.opposite()) {
            match exchange.cancel_order(symbol, order.order_id).await {
                Ok(()) => info!("Cancelled conflicting {} order {}", order.side, order.order_id),
                Err(e) => warn!("Failed to cancel order {}: {}", order.order_id, e),
            }
        }
    }

    /// Execute a resolved DIRECT_ORDER (size already absolute). A BUY
    /// overwrites any open position.
    pub async fn execute_direct(&self, decision: &Decision) -> Result<Option<Fill>> {
        if decision.action != DecisionAction::DirectOrder {
            return Ok(None);
        }
        let (Some(side), Some(size)) = (decision.side, decision.size) else {
            return Err(BotError::Validation(
                "DIRECT_ORDER must be resolved to side and size".to_string(),
            ));
        };
        self.place(side, size, "oracle").await.map(Some)
    }

    /// Act on a worker signal. A BUY is ignored while a position is open; a
    /// SELL closes the tracked position and is ignored when there is none.
    pub async fn handle_signal(&self, event: &SignalEvent) -> Result<Option<Fill>> {
        if self.shutdown.is_shutdown_requested() {
            return Err(BotError::ShuttingDown);
        }
        let source = event.identity.to_string();
        let mut guard = self.positions.lock().await;

        match event.signal {
            Signal::Hold => Ok(None),
            Signal::Buy => {
                if guard.position().is_some() {
                    info!("{}: BUY ignored, position already open", source);
                    return Ok(None);
                }
                let wallet = self.balances().await?;
                let size = strategy_buy_size(
                    &event.params,
                    &wallet,
                    event.price,
                    self.config.default_strategy_size,
                );
                debug!("{}: BUY sized {} from {:?}", source, size, wallet);
                self.place_locked(&mut guard, OrderSide::Buy, size, &source)
                    .await
                    .map(Some)
            }
            Signal::Sell => {
                let Some(size) = guard.position().map(|p| p.size) else {
                    info!("{}: SELL ignored, no open position", source);
                    return Ok(None);
                };
                self.place_locked(&mut guard, OrderSide::Sell, size, &source)
                    .await
                    .map(Some)
            }
        }
    }

    /// Wait for any submission holding the position lock to finish
    pub async fn drain(&self) {
        drop(self.positions.lock().await);
    }

    /// Consume worker signals until the channel closes or shutdown begins
    pub fn spawn_signal_consumer(
        self: Arc<Self>,
        mut signals: mpsc::Receiver<SignalEvent>,
    ) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = signals.recv() => event,
                    _ = shutdown.wait_for_shutdown() => None,
                };
                let Some(event) = event else {
                    break;
                };
                info!("Signal {} from {}", event.signal, event.identity);
                match self.handle_signal(&event).await {
                    Ok(_) => {}
                    Err(BotError::ShuttingDown) => break,
                    Err(e) => warn!("Signal from {} not executed: {}", event.identity, e),
                }
            }
            debug!("Signal consumer stopped");
        })
    }

    async fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&notification).await;
        }
    }
}
