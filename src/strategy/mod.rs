//! Strategy module
//!
//! Rule-based signal strategies and the machinery that runs them:
//! - `kinds/` - one pure `SignalStrategy` per strategy kind
//! - `registry` - the closed `StrategyKind` set and its dispatch
//! - `worker` - polling tasks that report signal changes
//! - `manager` - keeps the running workers in line with the latest decisions

pub mod identity;
pub mod indicators;
pub mod kinds;
pub mod manager;
pub mod registry;
pub mod traits;
pub mod worker;

pub use identity::{normalize_params, StrategyIdentity, StrategySpec};
pub use manager::{ReconcileReport, StrategyManager};
pub use registry::StrategyKind;
pub use traits::{Evaluation, SignalStrategy, StrategyState};
pub use worker::{SignalEvent, SignalWorker, WorkerContext, WorkerHandle, WorkerInfo};
