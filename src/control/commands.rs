//! Operator control channel
//!
//! Commands arrive over an mpsc channel from any front end (the stdin
//! console, tests). `Stop` starts the shutdown cascade; the other commands
//! are read-only queries answered through a oneshot reply.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ledger::BalanceLedger;
use crate::coordination::{GracefulShutdown, ShutdownSignal};
use crate::error::{BotError, Result};
use crate::strategy::{StrategyManager, WorkerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Stop the bot (already confirmed by the front end)
    Stop,
    /// List the running signal workers
    Strategies,
    /// Latest balances and wallet performance
    Balance,
}

impl OperatorCommand {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('/').to_ascii_lowercase().as_str() {
            "stop" => Some(OperatorCommand::Stop),
            "strategies" => Some(OperatorCommand::Strategies),
            "balance" => Some(OperatorCommand::Balance),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ControlRequest {
    pub command: OperatorCommand,
    pub reply: oneshot::Sender<String>,
}

/// Sending side of the control channel
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn request(&self, command: OperatorCommand) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| BotError::Internal("control listener is gone".to_string()))?;
        rx.await
            .map_err(|_| BotError::Internal("control listener dropped the request".to_string()))
    }
}

/// Answers operator commands against live runtime state
pub struct ControlListener {
    shutdown: Arc<GracefulShutdown>,
    manager: Arc<StrategyManager>,
    ledger: Arc<Mutex<BalanceLedger>>,
    base_asset: String,
    quote_asset: String,
}

impl ControlListener {
    pub fn new(
        shutdown: Arc<GracefulShutdown>,
        manager: Arc<StrategyManager>,
        ledger: Arc<Mutex<BalanceLedger>>,
        base_asset: &str,
        quote_asset: &str,
    ) -> Self {
        Self {
            shutdown,
            manager,
            ledger,
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
        }
    }

    pub async fn handle(&self, command: OperatorCommand) -> String {
        debug!("Operator command: {:?}", command);
        match command {
            OperatorCommand::Stop => {
                info!("Stop requested by operator");
                self.shutdown.request_shutdown(ShutdownSignal::Operator);
                "Stopping bot…".to_string()
            }
            OperatorCommand::Strategies => render_strategies(&self.manager.active_strategies().await),
            OperatorCommand::Balance => {
                self.ledger
                    .lock()
                    .await
                    .render(Utc::now(), &self.base_asset, &self.quote_asset)
            }
        }
    }

    /// Serve requests until every handle is dropped. Keeps answering
    /// queries during shutdown so the operator can watch teardown.
    pub fn spawn(self, mut requests: mpsc::Receiver<ControlRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let answer = self.handle(request.command).await;
                if request.reply.send(answer).is_err() {
                    warn!("Operator went away before the reply");
                }
            }
            debug!("Control listener stopped");
        })
    }
}

fn render_strategies(workers: &[WorkerInfo]) -> String {
    if workers.is_empty() {
        return "No active strategies at the moment.".to_string();
    }

    let mut lines = vec!["Active strategies:".to_string()];
    for worker in workers {
        let state = if worker.running { "" } else { " (exited)" };
        lines.push(format!(
            "• {}{} since {}",
            worker.kind,
            state,
            worker.started_at.format("%Y-%m-%d %H:%M UTC")
        ));
        for (key, value) in &worker.params {
            lines.push(format!("    – {}: {}", key, value));
        }
    }
    lines.join("\n")
}
