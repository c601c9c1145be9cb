//! Orchestrator cycle
//!
//! RUNNING: purge a stale position, gather balances and the market
//! snapshot, ask the oracle, apply direct orders, reconcile the signal
//! workers, then wait for the next cycle or shutdown.
//!
//! SHUTTING_DOWN (terminal): refuse new orders, drain the in-flight one,
//! cancel resting exchange orders, stop every worker, clear the artifacts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::control::{BalanceLedger, ControlListener, Notification, Notifier, WebhookNotifier};
use crate::coordination::{GracefulShutdown, ShutdownPhase};
use crate::domain::{Decision, DecisionAction, MarketSnapshot};
use crate::error::{BotError, Result};
use crate::exchange::build_exchange_client;
use crate::execution::{resolve_size, GatewayConfig, OrderGateway, RetryPolicy};
use crate::market_data::{BinanceMarketData, MarketDataSource};
use crate::oracle::{ArtifactStore, DecisionPipeline, OpenRouterClient, OracleContext};
use crate::persistence::{FileStateRepository, Position, PositionStore, StateRepository};
use crate::strategy::{ReconcileReport, SignalEvent, StrategyManager, WorkerContext};

/// Cycle parameters taken from `AppConfig`
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub candle_interval: String,
    pub candle_limit: u32,
    pub cycle_interval: Duration,
    pub position_ttl: chrono::Duration,
    pub fee_rate: Decimal,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbol: config.trading.symbol.clone(),
            base_asset: config.trading.base_asset.clone(),
            quote_asset: config.trading.quote_asset.clone(),
            candle_interval: config.trading.candle_interval.clone(),
            candle_limit: config.trading.candle_limit,
            cycle_interval: config.trading.cycle_interval(),
            position_ttl: config.trading.position_ttl(),
            fee_rate: config.oracle.fee_rate,
        }
    }
}

/// What one cycle did
#[derive(Debug, Default)]
pub struct CycleReport {
    pub purged: Option<Position>,
    pub decisions: usize,
    pub direct_filled: usize,
    pub direct_failed: usize,
    pub reconcile: ReconcileReport,
}

pub struct Orchestrator {
    settings: CycleSettings,
    shutdown: Arc<GracefulShutdown>,
    market_data: Arc<dyn MarketDataSource>,
    gateway: Arc<OrderGateway>,
    manager: Arc<StrategyManager>,
    pipeline: DecisionPipeline,
    ledger: Arc<Mutex<BalanceLedger>>,
    notifier: Option<Arc<dyn Notifier>>,
    fetch_retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        settings: CycleSettings,
        shutdown: Arc<GracefulShutdown>,
        market_data: Arc<dyn MarketDataSource>,
        gateway: Arc<OrderGateway>,
        manager: Arc<StrategyManager>,
        pipeline: DecisionPipeline,
        fetch_retry: RetryPolicy,
    ) -> Self {
        Self {
            settings,
            shutdown,
            market_data,
            gateway,
            manager,
            pipeline,
            ledger: Arc::new(Mutex::new(BalanceLedger::new())),
            notifier: None,
            fetch_retry,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn gateway(&self) -> &Arc<OrderGateway> {
        &self.gateway
    }

    pub fn manager(&self) -> &Arc<StrategyManager> {
        &self.manager
    }

    pub fn ledger(&self) -> &Arc<Mutex<BalanceLedger>> {
        &self.ledger
    }

    /// Listener answering operator commands against this runtime
    pub fn control_listener(&self) -> ControlListener {
        ControlListener::new(
            self.shutdown.clone(),
            self.manager.clone(),
            self.ledger.clone(),
            &self.settings.base_asset,
            &self.settings.quote_asset,
        )
    }

    async fn fetch_snapshot(&self) -> Result<MarketSnapshot> {
        let source = &self.market_data;
        let symbol = self.settings.symbol.as_str();
        let interval = self.settings.candle_interval.as_str();
        let limit = self.settings.candle_limit;
        let token = self.shutdown.token();
        self.fetch_retry
            .run("market snapshot", Some(&token), move || {
                source.fetch_snapshot(symbol, interval, limit)
            })
            .await
    }

    /// One RUNNING iteration
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let positions = self.gateway.positions();

        // A stale position must be gone before any decision is applied
        report.purged = positions
            .purge_if_expired(now, self.settings.position_ttl)
            .await?;
        let position = positions.current().await;

        let wallet = self.gateway.balances().await?;
        let snapshot = self.fetch_snapshot().await?;
        let price = snapshot.last_price;
        info!(
            "Cycle inputs: {} {}, {} {}, price {}, position {}",
            wallet.base,
            self.settings.base_asset,
            wallet.quote,
            self.settings.quote_asset,
            price,
            position
                .as_ref()
                .map(|p| format!("{} @ {}", p.size, p.entry_price))
                .unwrap_or_else(|| "none".to_string())
        );
        self.ledger.lock().await.record(now, &wallet, price);

        let ctx = OracleContext {
            hours_since_last_trade: position
                .as_ref()
                .map(|p| p.age(now).num_seconds() as f64 / 3600.0),
            position,
            snapshot,
            wallet,
            previous_decision: self.pipeline.previous_decision().await,
            base_asset: self.settings.base_asset.clone(),
            quote_asset: self.settings.quote_asset.clone(),
            fee_rate: self.settings.fee_rate,
        };
        let decisions = self.pipeline.decide(&ctx).await;
        report.decisions = decisions.len();

        let (direct, strategies): (Vec<Decision>, Vec<Decision>) = decisions
            .into_iter()
            .map(|d| resolve_size(d, &wallet, price))
            .filter(|d| d.action != DecisionAction::Hold)
            .partition(|d| d.action == DecisionAction::DirectOrder);

        // Direct orders first, in oracle order
        for decision in &direct {
            if self.shutdown.is_shutdown_requested() {
                info!("Shutdown requested, skipping remaining direct orders");
                return Ok(report);
            }
            match self.gateway.execute_direct(decision).await {
                Ok(Some(fill)) => {
                    report.direct_filled += 1;
                    debug!("Direct order filled: {:?}", fill);
                }
                Ok(None) => {}
                Err(BotError::ShuttingDown) => return Ok(report),
                Err(e) => {
                    report.direct_failed += 1;
                    warn!("Direct order {:?} failed: {}", decision.side, e);
                }
            }
        }

        report.reconcile = self.manager.reconcile(&strategies).await;
        info!(
            "Cycle done: {} decision(s), {} filled, {} failed, workers +{} -{} ={}",
            report.decisions,
            report.direct_filled,
            report.direct_failed,
            report.reconcile.started.len(),
            report.reconcile.stopped.len(),
            report.reconcile.kept.len()
        );
        Ok(report)
    }

    /// Wait for the next cycle; `false` when shutdown interrupted the wait
    async fn wait_next_cycle(&self) -> bool {
        let mut token = self.shutdown.token();
        info!("Waiting up to {:?} or until shutdown", self.settings.cycle_interval);
        tokio::select! {
            _ = tokio::time::sleep(self.settings.cycle_interval) => true,
            signal = token.wait_for_shutdown() => {
                info!("Shutdown ({}) received, leaving cycle loop", signal);
                false
            }
        }
    }

    /// Run cycles until shutdown, then tear down.
    pub async fn run(&self, signals: mpsc::Receiver<SignalEvent>) -> Result<()> {
        let consumer = self.gateway.clone().spawn_signal_consumer(signals);
        let mut cycle = 0u64;

        while !self.shutdown.is_shutdown_requested() {
            cycle += 1;
            info!("=== Cycle {} ===", cycle);
            if let Err(e) = self.run_cycle(Utc::now()).await {
                if e.is_fatal() {
                    error!("Fatal error in cycle {}: {}", cycle, e);
                    self.shutdown
                        .request_shutdown(crate::coordination::ShutdownSignal::Graceful);
                    self.shutdown_sequence(&e.to_string()).await;
                    let _ = consumer.await;
                    return Err(e);
                }
                error!("Cycle {} failed: {}", cycle, e);
                self.notify(Notification::CycleFailed {
                    reason: e.to_string(),
                })
                .await;
            }
            if !self.wait_next_cycle().await {
                break;
            }
        }

        let reason = self
            .shutdown
            .signal()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.shutdown_sequence(&reason).await;
        if let Err(e) = consumer.await {
            warn!("Signal consumer ended abnormally: {}", e);
        }
        Ok(())
    }

    /// Ordered teardown. Every step runs even if an earlier one failed.
    pub async fn shutdown_sequence(&self, reason: &str) {
        info!("Shutting down: {}", reason);
        self.shutdown.set_phase(ShutdownPhase::StoppingNewOrders);
        self.notify(Notification::ShuttingDown {
            reason: reason.to_string(),
        })
        .await;

        self.shutdown.set_phase(ShutdownPhase::DrainingOrders);
        self.gateway.drain().await;

        self.shutdown.set_phase(ShutdownPhase::CancellingOrders);
        match self
            .gateway
            .exchange()
            .cancel_all_open_orders(&self.settings.symbol)
            .await
        {
            Ok(n) => info!("Cancelled {} open order(s)", n),
            Err(e) => warn!("Could not cancel open orders: {}", e),
        }

        self.shutdown.set_phase(ShutdownPhase::StoppingWorkers);
        let stopped = self.manager.stop_all().await;
        info!("Stopped {} signal worker(s)", stopped);

        self.shutdown.set_phase(ShutdownPhase::ClearingArtifacts);
        if let Err(e) = self.pipeline.artifacts().clear().await {
            warn!("Could not clear decision artifacts: {}", e);
        }

        self.shutdown.set_phase(ShutdownPhase::Complete);
    }

    async fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&notification).await;
        }
    }
}

/// Wire every component from configuration. Missing credentials fail here.
pub async fn build_runtime(
    config: &AppConfig,
    dry_run: bool,
    shutdown: Arc<GracefulShutdown>,
) -> Result<(Orchestrator, mpsc::Receiver<SignalEvent>)> {
    if let Err(problems) = config.validate() {
        return Err(BotError::Validation(problems.join("; ")));
    }

    let market_data: Arc<dyn MarketDataSource> = Arc::new(BinanceMarketData::new(
        &config.market_data.rest_url,
        Duration::from_secs(config.market_data.timeout_secs),
    )?);
    let exchange = build_exchange_client(config, dry_run, market_data.clone())?;
    let oracle = OpenRouterClient::new(&config.oracle, config.execution.retry_policy())?;

    let repo: Arc<dyn StateRepository> =
        Arc::new(FileStateRepository::new(config.storage.state_dir.clone()));
    let positions = Arc::new(PositionStore::load(repo.clone()).await?);

    let notifier: Option<Arc<dyn Notifier>> = WebhookNotifier::from_config(&config.notifications)
        .map(|n| n as Arc<dyn Notifier>);

    let gateway = Arc::new(
        OrderGateway::new(
            exchange,
            positions,
            config.execution.retry_policy(),
            shutdown.token(),
            GatewayConfig {
                symbol: config.trading.symbol.clone(),
                base_asset: config.trading.base_asset.clone(),
                quote_asset: config.trading.quote_asset.clone(),
                default_strategy_size: config.trading.default_strategy_order_size,
            },
        )
        .with_notifier(notifier.clone()),
    );

    let fetch_retry = RetryPolicy::new(
        config.workers.fetch_max_attempts,
        Duration::from_millis(config.execution.base_backoff_ms),
        Duration::from_millis(config.execution.max_backoff_ms),
    );
    let (signal_tx, signal_rx) = mpsc::channel(config.workers.signal_channel_capacity);
    let ctx = WorkerContext {
        market_data: market_data.clone(),
        repo,
        signals: signal_tx,
        shutdown: shutdown.token(),
        symbol: config.trading.symbol.clone(),
        default_interval: config.trading.candle_interval.clone(),
        candle_limit: config.trading.candle_limit,
        poll_interval: config.workers.poll_interval(),
        fetch_retry: fetch_retry.clone(),
    };
    let manager = Arc::new(StrategyManager::new(ctx, config.workers.join_timeout()));

    let pipeline = DecisionPipeline::new(
        Arc::new(oracle),
        ArtifactStore::new(config.storage.artifacts_dir.clone()),
    );

    let orchestrator = Orchestrator::new(
        CycleSettings::from_config(config),
        shutdown,
        market_data,
        gateway,
        manager,
        pipeline,
        fetch_retry,
    )
    .with_notifier(notifier);

    Ok((orchestrator, signal_rx))
}
