//! Persistence Layer for State Management and Recovery
//!
//! - State repository abstraction with file and in-memory backends
//! - Typed per-strategy state records
//! - The single global position record

pub mod position_store;
pub mod repository;
pub mod strategy_state;

pub use position_store::{Position, PositionGuard, PositionStore, SellOutcome, POSITION_KEY};
pub use repository::{FileStateRepository, MemoryStateRepository, StateRepository};
pub use strategy_state::StrategyStateStore;
