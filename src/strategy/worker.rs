//! Signal workers
//!
//! A worker polls market data on its own cadence, runs one strategy kind
//! over it and reports signal changes to the order gateway over a channel.
//! It never places orders itself.
//!
//! Emission rule: a signal is emitted when it is BUY or SELL and differs
//! from the last emitted one. HOLD never overwrites the remembered signal,
//! so BUY, HOLD, BUY emits once. The record is persisted before the event
//! is sent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::identity::{StrategyIdentity, StrategySpec};
use super::registry::{indicator_params, StrategyKind};
use super::traits::{SignalStrategy, StrategyState};
use crate::coordination::ShutdownToken;
use crate::domain::{ParamMap, Signal};
use crate::error::{BotError, Result};
use crate::execution::RetryPolicy;
use crate::market_data::MarketDataSource;
use crate::persistence::{StateRepository, StrategyStateStore};

/// A signal change reported by a worker
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub identity: StrategyIdentity,
    pub kind: StrategyKind,
    /// Normalized parameters, including sizing keys
    pub params: ParamMap,
    pub signal: Signal,
    /// Last price of the snapshot that produced the signal
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// Everything a worker needs besides its own spec
#[derive(Clone)]
pub struct WorkerContext {
    pub market_data: Arc<dyn MarketDataSource>,
    pub repo: Arc<dyn StateRepository>,
    pub signals: mpsc::Sender<SignalEvent>,
    pub shutdown: ShutdownToken,
    pub symbol: String,
    /// Kline interval used when a strategy has no `timeframe` param
    pub default_interval: String,
    pub candle_limit: u32,
    pub poll_interval: Duration,
    pub fetch_retry: RetryPolicy,
}

/// Read-only view of a running worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerInfo {
    pub identity: StrategyIdentity,
    pub kind: StrategyKind,
    pub params: ParamMap,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

/// Runtime handle owned by the strategy manager
pub struct WorkerHandle {
    pub identity: StrategyIdentity,
    pub kind: StrategyKind,
    pub params: ParamMap,
    pub started_at: DateTime<Utc>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            identity: self.identity.clone(),
            kind: self.kind,
            params: self.params.clone(),
            started_at: self.started_at,
            running: !self.task.is_finished(),
        }
    }

    /// Signal the worker and wait up to `timeout` for it to exit. Returns
    /// false when the task had to be aborted.
    pub async fn stop(self, timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Worker {} ended abnormally: {}", self.identity, e);
                true
            }
            Err(_) => {
                warn!(
                    "Worker {} did not stop within {:?}, aborting",
                    self.identity, timeout
                );
                task.abort();
                false
            }
        }
    }
}

pub struct SignalWorker<S: SignalStrategy> {
    spec: StrategySpec,
    params: S::Params,
    interval: String,
    store: StrategyStateStore,
    ctx: WorkerContext,
}

impl<S: SignalStrategy> SignalWorker<S> {
    /// Validate parameters once. Invalid parameters never produce a worker.
    pub fn new(spec: StrategySpec, ctx: WorkerContext) -> Result<Self> {
        let params = S::validate(&indicator_params(&spec.params))?;
        let interval = spec
            .timeframe()
            .unwrap_or(ctx.default_interval.as_str())
            .to_string();
        let store = StrategyStateStore::new(ctx.repo.clone(), spec.identity.as_str());
        Ok(Self {
            spec,
            params,
            interval,
            store,
            ctx,
        })
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub async fn load_record(&self) -> StrategyState<S::State> {
        self.store.load().await
    }

    /// One iteration: fetch, compute, persist on change, and return the
    /// event to emit, if any. `record` is only updated once the new state
    /// is on disk.
    pub async fn poll_once(
        &self,
        record: &mut StrategyState<S::State>,
    ) -> Result<Option<SignalEvent>> {
        let source = &self.ctx.market_data;
        let symbol = self.ctx.symbol.as_str();
        let interval = self.interval.as_str();
        let limit = self.ctx.candle_limit;
        let snapshot = self
            .ctx
            .fetch_retry
            .run("kline fetch", Some(&self.ctx.shutdown), move || {
                source.fetch_snapshot(symbol, interval, limit)
            })
            .await?;

        let eval = S::compute(&snapshot, &self.params, &record.indicator);
        debug!("Computed {} over {} candles", eval.signal, snapshot.len());

        let mut next = record.clone();
        next.indicator = eval.state;
        let emit = eval.signal.is_actionable() && eval.signal != record.last_signal;
        if emit {
            next.last_signal = eval.signal;
        }

        if next != *record {
            next.updated_at = Some(Utc::now());
            self.store.save(&next).await?;
            *record = next;
        }

        if !emit {
            return Ok(None);
        }
        Ok(Some(SignalEvent {
            identity: self.spec.identity.clone(),
            kind: self.spec.kind,
            params: self.spec.params.clone(),
            signal: eval.signal,
            price: snapshot.last_price,
            at: Utc::now(),
        }))
    }

    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let identity = self.spec.identity.clone();
        let kind = self.spec.kind;
        let params = self.spec.params.clone();
        let span = info_span!("worker", strategy = %identity);
        let task = tokio::spawn(self.run(stop_rx).instrument(span));

        WorkerHandle {
            identity,
            kind,
            params,
            started_at: Utc::now(),
            stop_tx,
            task,
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut record = self.load_record().await;
        let mut shutdown = self.ctx.shutdown.clone();
        info!(
            "Worker started: {} klines, polling every {:?}, last signal {}",
            self.interval, self.ctx.poll_interval, record.last_signal
        );

        loop {
            if *stop_rx.borrow() || shutdown.is_shutdown_requested() {
                break;
            }

            let polled = tokio::select! {
                r = self.poll_once(&mut record) => r,
                _ = stop_rx.changed() => break,
            };

            match polled {
                Ok(Some(event)) => {
                    info!("Signal changed to {} at {}", event.signal, event.price);
                    if self.ctx.signals.send(event).await.is_err() {
                        warn!("Signal channel closed, stopping worker");
                        break;
                    }
                }
                Ok(None) => {}
                Err(BotError::ShuttingDown) => break,
                Err(e) => warn!("Poll failed, skipping iteration: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.poll_interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.wait_for_shutdown() => {}
            }
        }

        info!("Worker stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::domain::{Candle, MarketSnapshot};
    use crate::market_data::MockMarketDataSource;
    use crate::persistence::MemoryStateRepository;
    use crate::strategy::kinds::Rsi;
    use crate::strategy::traits::Evaluation;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Test kind whose signal is encoded in the last close:
    /// 1 is BUY, 2 is SELL, anything else HOLD. State counts polls.
    pub(crate) struct Scripted;

    impl SignalStrategy for Scripted {
        type Params = ();
        type State = u32;

        fn validate(_: &ParamMap) -> Result<()> {
            Ok(())
        }

        fn compute(snapshot: &MarketSnapshot, _: &(), state: &u32) -> Evaluation<u32> {
            let signal = match snapshot.last_candle().map(|c| c.close as i64) {
                Some(1) => Signal::Buy,
                Some(2) => Signal::Sell,
                _ => Signal::Hold,
            };
            Evaluation::new(signal, state + 1)
        }
    }

    /// Serves queued closes; `None` simulates an outage.
    pub(crate) struct FakeFeed {
        queue: Mutex<VecDeque<Option<f64>>>,
    }

    impl FakeFeed {
        pub(crate) fn new(closes: &[Option<f64>]) -> Self {
            Self {
                queue: Mutex::new(closes.iter().copied().collect()),
            }
        }

        pub(crate) fn flat() -> Self {
            Self::new(&[])
        }
    }

    pub(crate) fn snapshot_with_close(close: f64) -> MarketSnapshot {
        let candle = Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        };
        MarketSnapshot::new("BTCUSDT", "4h", vec![candle], dec!(50000))
    }

    #[async_trait]
    impl MarketDataSource for FakeFeed {
        async fn fetch_snapshot(&self, _: &str, _: &str, _: u32) -> Result<MarketSnapshot> {
            let next = self.queue.lock().unwrap().pop_front().unwrap_or(Some(0.0));
            match next {
                Some(close) => Ok(snapshot_with_close(close)),
                None => Err(BotError::MarketDataUnavailable("feed down".into())),
            }
        }

        async fn latest_price(&self, _: &str) -> Result<Decimal> {
            Ok(dec!(50000))
        }
    }

    pub(crate) fn test_context(
        market_data: Arc<dyn MarketDataSource>,
        repo: Arc<dyn StateRepository>,
        shutdown: &GracefulShutdown,
    ) -> (WorkerContext, mpsc::Receiver<SignalEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let ctx = WorkerContext {
            market_data,
            repo,
            signals: tx,
            shutdown: shutdown.token(),
            symbol: "BTCUSDT".to_string(),
            default_interval: "4h".to_string(),
            candle_limit: 100,
            poll_interval: Duration::from_millis(10),
            fetch_retry: RetryPolicy::immediate(2),
        };
        (ctx, rx)
    }

    fn spec(params: serde_json::Value) -> StrategySpec {
        let map: ParamMap = params
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        StrategySpec::new(StrategyKind::Rsi, &map)
    }

    #[tokio::test]
    async fn test_emits_only_on_change() {
        let shutdown = GracefulShutdown::new();
        let feed = Arc::new(FakeFeed::new(&[Some(1.0), Some(1.0), Some(0.0), Some(1.0), Some(2.0)]));
        let (ctx, _rx) = test_context(feed, Arc::new(MemoryStateRepository::new()), &shutdown);
        let worker = SignalWorker::<Scripted>::new(spec(json!({})), ctx).unwrap();
        let mut record = worker.load_record().await;

        let mut emitted = Vec::new();
        for _ in 0..5 {
            if let Some(event) = worker.poll_once(&mut record).await.unwrap() {
                emitted.push(event.signal);
            }
        }
        // BUY, BUY, HOLD, BUY, SELL -> BUY once, then SELL
        assert_eq!(emitted, vec![Signal::Buy, Signal::Sell]);
        assert_eq!(record.last_signal, Signal::Sell);
        assert_eq!(record.indicator, 5);
    }

    #[tokio::test]
    async fn test_state_persisted_before_emit_and_recovered() {
        let shutdown = GracefulShutdown::new();
        let repo: Arc<dyn StateRepository> = Arc::new(MemoryStateRepository::new());
        let (ctx, _rx) = test_context(
            Arc::new(FakeFeed::new(&[Some(1.0), Some(1.0)])),
            repo.clone(),
            &shutdown,
        );

        let first = SignalWorker::<Scripted>::new(spec(json!({"period": 7})), ctx.clone()).unwrap();
        let mut record = first.load_record().await;
        let event = first.poll_once(&mut record).await.unwrap().unwrap();
        assert_eq!(event.signal, Signal::Buy);
        assert_eq!(event.price, dec!(50000));

        // A restarted worker with the same identity resumes from disk
        let second = SignalWorker::<Scripted>::new(spec(json!({"period": 7})), ctx).unwrap();
        let mut recovered = second.load_record().await;
        assert_eq!(recovered, record);
        assert!(second.poll_once(&mut recovered).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_exhaustion_skips_iteration() {
        let shutdown = GracefulShutdown::new();
        let (ctx, _rx) = test_context(
            Arc::new(FakeFeed::new(&[None, None, Some(1.0)])),
            Arc::new(MemoryStateRepository::new()),
            &shutdown,
        );
        let worker = SignalWorker::<Scripted>::new(spec(json!({})), ctx).unwrap();
        let mut record = worker.load_record().await;

        let err = worker.poll_once(&mut record).await.unwrap_err();
        assert!(matches!(err, BotError::MarketDataUnavailable(_)));
        assert_eq!(record, StrategyState::default());

        let event = worker.poll_once(&mut record).await.unwrap();
        assert_eq!(event.map(|e| e.signal), Some(Signal::Buy));
    }

    #[tokio::test]
    async fn test_invalid_params_abort_creation() {
        let shutdown = GracefulShutdown::new();
        let (ctx, _rx) = test_context(
            Arc::new(FakeFeed::flat()),
            Arc::new(MemoryStateRepository::new()),
            &shutdown,
        );
        let result = SignalWorker::<Rsi>::new(spec(json!({"oversold": 80, "overbought": 20})), ctx);
        assert!(matches!(result, Err(BotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_timeframe_param_selects_interval() {
        let shutdown = GracefulShutdown::new();
        let mut market = MockMarketDataSource::new();
        market
            .expect_fetch_snapshot()
            .withf(|symbol, interval, _| symbol == "BTCUSDT" && interval == "1h")
            .times(1)
            .returning(|_, _, _| Ok(snapshot_with_close(0.0)));
        let (ctx, _rx) = test_context(
            Arc::new(market),
            Arc::new(MemoryStateRepository::new()),
            &shutdown,
        );

        let worker = SignalWorker::<Scripted>::new(spec(json!({"timeframe": "1h"})), ctx).unwrap();
        assert_eq!(worker.interval(), "1h");
        let mut record = worker.load_record().await;
        assert!(worker.poll_once(&mut record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_worker_reports_and_stops() {
        let shutdown = GracefulShutdown::new();
        let (ctx, mut rx) = test_context(
            Arc::new(FakeFeed::new(&[Some(2.0)])),
            Arc::new(MemoryStateRepository::new()),
            &shutdown,
        );
        let handle = SignalWorker::<Scripted>::new(spec(json!({})), ctx).unwrap().spawn();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.signal, Signal::Sell);
        assert_eq!(event.identity, handle.identity);
        assert!(handle.info().running);
        assert!(handle.stop(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_worker_exits_on_shutdown() {
        let shutdown = GracefulShutdown::new();
        let (ctx, _rx) = test_context(
            Arc::new(FakeFeed::flat()),
            Arc::new(MemoryStateRepository::new()),
            &shutdown,
        );
        let handle = SignalWorker::<Scripted>::new(spec(json!({})), ctx).unwrap().spawn();
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
