pub mod cli;
pub mod config;
pub mod control;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod market_data;
pub mod oracle;
pub mod orchestrator;
pub mod persistence;
pub mod strategy;

pub use config::AppConfig;
pub use control::{ControlHandle, OperatorCommand};
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use error::{BotError, ErrorClass, Result};
pub use execution::{OrderGateway, RetryPolicy};
pub use orchestrator::{build_runtime, Orchestrator};
pub use persistence::{Position, PositionStore, StateRepository};
pub use strategy::{StrategyIdentity, StrategyKind, StrategyManager};
