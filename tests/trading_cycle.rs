//! End-to-end cycles against the paper exchange, a fixed-price feed and a
//! scripted oracle, with state on disk.

use async_trait::async_trait;
use candlebot::control::{run_console, ControlHandle, OperatorCommand};
use candlebot::coordination::{GracefulShutdown, ShutdownPhase, ShutdownSignal};
use candlebot::domain::{Candle, MarketSnapshot, OrderSide};
use candlebot::error::{BotError, Result};
use candlebot::exchange::{ExchangeClient, PaperExchange};
use candlebot::execution::{GatewayConfig, OrderGateway, RetryPolicy};
use candlebot::market_data::MarketDataSource;
use candlebot::oracle::artifacts::RAW_FILE;
use candlebot::oracle::{ArtifactStore, DecisionOracle, DecisionPipeline};
use candlebot::orchestrator::{CycleSettings, Orchestrator};
use candlebot::persistence::{
    FileStateRepository, Position, PositionStore, StateRepository, POSITION_KEY,
};
use candlebot::strategy::{SignalEvent, StrategyManager, WorkerContext};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const PRICE: Decimal = dec!(50000);

struct FixedFeed;

#[async_trait]
impl MarketDataSource for FixedFeed {
    async fn fetch_snapshot(&self, symbol: &str, interval: &str, limit: u32) -> Result<MarketSnapshot> {
        let candles = (0..limit.min(50) as i64)
            .map(|i| Candle {
                open_time: i * 14_400_000,
                close_time: (i + 1) * 14_400_000 - 1,
                open: 50000.0,
                high: 50100.0,
                low: 49900.0,
                close: 50000.0,
                volume: 10.0,
            })
            .collect();
        Ok(MarketSnapshot::new(symbol, interval, candles, PRICE))
    }

    async fn latest_price(&self, _symbol: &str) -> Result<Decimal> {
        Ok(PRICE)
    }
}

/// Answers each call with the next scripted reply; HOLD once exhausted
struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedOracle {
    fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
        })
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(r#"[{"action":"HOLD"}]"#.to_string()))
    }
}

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "candlebot_it_{}_{}",
        name,
        Utc::now().timestamp_nanos_opt().unwrap_or(0)
    ))
}

struct Harness {
    orchestrator: Orchestrator,
    shutdown: Arc<GracefulShutdown>,
    exchange: Arc<PaperExchange>,
    signals: Option<mpsc::Receiver<SignalEvent>>,
    root: PathBuf,
}

async fn harness(root: PathBuf, oracle: Arc<ScriptedOracle>) -> Harness {
    let shutdown = Arc::new(GracefulShutdown::new());
    let feed: Arc<dyn MarketDataSource> = Arc::new(FixedFeed);
    let exchange = Arc::new(PaperExchange::new(
        feed.clone(),
        "BTC",
        "USDT",
        Decimal::ZERO,
        dec!(1000),
    ));

    let repo: Arc<dyn StateRepository> = Arc::new(FileStateRepository::new(root.join("state")));
    let positions = Arc::new(PositionStore::load(repo.clone()).await.unwrap());
    let gateway = Arc::new(OrderGateway::new(
        exchange.clone(),
        positions,
        RetryPolicy::immediate(2),
        shutdown.token(),
        GatewayConfig {
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            default_strategy_size: dec!(0.001),
        },
    ));

    let (tx, rx) = mpsc::channel(16);
    let ctx = WorkerContext {
        market_data: feed.clone(),
        repo,
        signals: tx,
        shutdown: shutdown.token(),
        symbol: "BTCUSDT".into(),
        default_interval: "4h".into(),
        candle_limit: 50,
        poll_interval: Duration::from_secs(3600),
        fetch_retry: RetryPolicy::immediate(1),
    };
    let manager = Arc::new(StrategyManager::new(ctx, Duration::from_secs(1)));
    let pipeline = DecisionPipeline::new(oracle, ArtifactStore::new(root.join("artifacts")));

    let settings = CycleSettings {
        symbol: "BTCUSDT".into(),
        base_asset: "BTC".into(),
        quote_asset: "USDT".into(),
        candle_interval: "4h".into(),
        candle_limit: 50,
        cycle_interval: Duration::from_millis(20),
        position_ttl: chrono::Duration::hours(4),
        fee_rate: dec!(0.001),
    };
    let orchestrator = Orchestrator::new(
        settings,
        shutdown.clone(),
        feed,
        gateway,
        manager,
        pipeline,
        RetryPolicy::immediate(1),
    );

    Harness {
        orchestrator,
        shutdown,
        exchange,
        signals: Some(rx),
        root,
    }
}

fn reply(text: &str) -> Result<String> {
    Ok(text.to_string())
}

#[tokio::test]
async fn test_direct_buy_survives_restart() {
    let root = temp_dir("restart");
    let oracle = ScriptedOracle::new(vec![reply(
        r#"Reasoning first. [{"action":"DIRECT_ORDER","side":"BUY","size_pct":0.3}]"#,
    )]);
    let h = harness(root.clone(), oracle).await;

    let report = h.orchestrator.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.direct_filled, 1);
    assert_eq!(h.exchange.get_free_balance("BTC").await.unwrap(), dec!(0.006));
    assert_eq!(h.exchange.get_free_balance("USDT").await.unwrap(), dec!(700));

    // A fresh store over the same directory sees the committed position
    let repo: Arc<dyn StateRepository> = Arc::new(FileStateRepository::new(root.join("state")));
    let reloaded = PositionStore::load(repo).await.unwrap();
    let position = reloaded.current().await.unwrap();
    assert_eq!(position.side, OrderSide::Buy);
    assert_eq!(position.size, dec!(0.006));
    assert_eq!(position.entry_price, PRICE);

    let _ = tokio::fs::remove_dir_all(&h.root).await;
}

#[tokio::test]
async fn test_stale_position_purged_before_decisions() {
    let root = temp_dir("stale");
    let repo = FileStateRepository::new(root.join("state"));
    let stale = Position {
        side: OrderSide::Buy,
        size: dec!(0.01),
        entry_price: dec!(48000),
        opened_at: Utc::now() - chrono::Duration::hours(5),
    };
    repo.store(POSITION_KEY, &serde_json::to_value(&stale).unwrap())
        .await
        .unwrap();

    let h = harness(root.clone(), ScriptedOracle::new(Vec::new())).await;
    let report = h.orchestrator.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.purged, Some(stale));
    assert!(h.orchestrator.gateway().positions().current().await.is_none());
    assert!(repo.load(POSITION_KEY).await.unwrap().is_none());

    let _ = tokio::fs::remove_dir_all(&h.root).await;
}

#[tokio::test]
async fn test_repeated_batch_keeps_workers_then_hold_stops_them() {
    let root = temp_dir("reconcile");
    let batch = r#"[
        {"action":"STRATEGY","strategy_name":"rsi","params":{"period":14}},
        {"action":"STRATEGY","strategy_name":"RSI","params":{"period":14.0}},
        {"action":"STRATEGY","strategy_name":"macd","params":{}}
    ]"#;
    let oracle = ScriptedOracle::new(vec![reply(batch), reply(batch), reply("[]")]);
    let h = harness(root.clone(), oracle).await;

    let first = h.orchestrator.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(first.reconcile.started.len(), 2);
    assert_eq!(h.orchestrator.manager().len().await, 2);

    let second = h.orchestrator.run_cycle(Utc::now()).await.unwrap();
    assert!(second.reconcile.is_noop());
    assert_eq!(second.reconcile.kept.len(), 2);

    let third = h.orchestrator.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(third.reconcile.stopped.len(), 2);
    assert!(h.orchestrator.manager().is_empty().await);

    let _ = tokio::fs::remove_dir_all(&h.root).await;
}

#[tokio::test]
async fn test_oracle_failure_holds_and_loop_stops_cleanly() {
    let root = temp_dir("shutdown");
    let oracle = ScriptedOracle::new(vec![Err(BotError::Oracle("unreachable".into()))]);
    let mut h = harness(root.clone(), oracle).await;
    let signals = h.signals.take().unwrap();

    let shutdown = h.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.request_shutdown(ShutdownSignal::Operator);
    });

    tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run(signals))
        .await
        .expect("loop should stop after shutdown")
        .unwrap();

    assert_eq!(h.shutdown.current_phase(), ShutdownPhase::Complete);
    assert!(h.orchestrator.gateway().positions().current().await.is_none());
    assert_eq!(h.exchange.get_free_balance("USDT").await.unwrap(), dec!(1000));
    assert!(!root.join("artifacts").join(RAW_FILE).exists());

    let _ = tokio::fs::remove_dir_all(&h.root).await;
}

#[tokio::test]
async fn test_console_stop_ends_the_loop() {
    let root = temp_dir("console");
    let mut h = harness(root.clone(), ScriptedOracle::new(Vec::new())).await;
    let signals = h.signals.take().unwrap();

    let (handle, requests) = ControlHandle::channel(4);
    let listener = h.orchestrator.control_listener().spawn(requests);
    let (lines_tx, lines) = mpsc::channel(8);
    let console = tokio::spawn(run_console(
        lines,
        tokio::io::sink(),
        handle.clone(),
        h.shutdown.token(),
    ));

    let orchestrator = &h.orchestrator;
    let operator = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let balance = handle.request(OperatorCommand::Balance).await.unwrap();
        assert!(balance.contains("USDT = 1000"));
        let strategies = handle.request(OperatorCommand::Strategies).await.unwrap();
        assert!(strategies.contains("No active strategies"));

        lines_tx.send("stop".to_string()).await.unwrap();
        lines_tx.send("yes".to_string()).await.unwrap();
    };
    let (result, ()) = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::join(orchestrator.run(signals), operator),
    )
    .await
    .expect("operator stop should end the loop");
    result.unwrap();

    assert_eq!(h.shutdown.signal(), Some(ShutdownSignal::Operator));
    assert_eq!(h.shutdown.current_phase(), ShutdownPhase::Complete);

    console.await.unwrap().unwrap();
    drop(handle);
    listener.await.unwrap();
    let _ = tokio::fs::remove_dir_all(&h.root).await;
}
