//! Strategy Manager
//!
//! Owns the registry of running signal workers, keyed by strategy identity.
//! `reconcile` makes the running set match one decision batch: identities
//! new to the batch start, identities missing from it stop, identities in
//! both are left alone. Every membership change happens under the manager
//! lock, so two reconciles never interleave.

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::identity::{StrategyIdentity, StrategySpec};
use super::worker::{WorkerContext, WorkerHandle, WorkerInfo};
use crate::domain::{Decision, DecisionAction};

/// What one reconcile did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub started: Vec<StrategyIdentity>,
    pub stopped: Vec<StrategyIdentity>,
    pub kept: Vec<StrategyIdentity>,
    /// Strategy name (as requested) and why it was not started
    pub rejected: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

pub struct StrategyManager {
    workers: Mutex<HashMap<StrategyIdentity, WorkerHandle>>,
    ctx: WorkerContext,
    join_timeout: Duration,
}

impl StrategyManager {
    pub fn new(ctx: WorkerContext, join_timeout: Duration) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            ctx,
            join_timeout,
        }
    }

    /// Make the running set equal to the STRATEGY decisions of `decisions`.
    /// Other actions are ignored. Duplicates collapse onto one identity.
    pub async fn reconcile(&self, decisions: &[Decision]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut wanted: BTreeMap<StrategyIdentity, StrategySpec> = BTreeMap::new();
        for decision in decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Strategy)
        {
            let requested = decision.strategy_name.clone().unwrap_or_default();
            let spec = StrategySpec::from_decision(decision)
                .and_then(|spec| spec.kind.validate(&spec.params).map(|_| spec));
            match spec {
                Ok(spec) => {
                    if wanted.contains_key(&spec.identity) {
                        debug!("Duplicate strategy request {}", spec.identity);
                    }
                    wanted.entry(spec.identity.clone()).or_insert(spec);
                }
                Err(e) => {
                    warn!("Rejecting strategy '{}': {}", requested, e);
                    report.rejected.push((requested, e.to_string()));
                }
            }
        }

        let mut workers = self.workers.lock().await;

        let absent: Vec<StrategyIdentity> = workers
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        let handles: Vec<WorkerHandle> = absent.iter().filter_map(|id| workers.remove(id)).collect();
        for handle in &handles {
            info!("Stopping strategy {}", handle.identity);
        }
        join_all(handles.into_iter().map(|h| h.stop(self.join_timeout))).await;
        report.stopped = absent;

        // A worker that died on its own is restarted below
        let dead: Vec<StrategyIdentity> = workers
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            if let Some(handle) = workers.remove(&id) {
                warn!("Strategy {} exited on its own", id);
                handle.stop(Duration::ZERO).await;
            }
        }

        if self.ctx.shutdown.is_shutdown_requested() {
            info!("Shutdown in progress, not starting strategies");
            return report;
        }

        for (identity, spec) in wanted {
            if workers.contains_key(&identity) {
                report.kept.push(identity);
                continue;
            }
            let name = spec.kind.as_str().to_string();
            match spec.kind.spawn(spec, self.ctx.clone()) {
                Ok(handle) => {
                    info!("Started strategy {}", identity);
                    workers.insert(identity.clone(), handle);
                    report.started.push(identity);
                }
                Err(e) => {
                    warn!("Could not start strategy {}: {}", identity, e);
                    report.rejected.push((name, e.to_string()));
                }
            }
        }

        report
    }

    /// Stop every worker. Calling it again is a no-op.
    pub async fn stop_all(&self) -> usize {
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return 0;
        }
        let handles: Vec<WorkerHandle> = workers.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        info!("Stopping {} strategies", count);
        let clean = join_all(handles.into_iter().map(|h| h.stop(self.join_timeout)))
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count();
        if clean < count {
            warn!("{} strategies had to be aborted", count - clean);
        }
        count
    }

    pub async fn active_strategies(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.lock().await;
        let mut infos: Vec<WorkerInfo> = workers.values().map(WorkerHandle::info).collect();
        infos.sort_by(|a, b| a.identity.cmp(&b.identity));
        infos
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }
}
