//! Coordination primitives shared by the orchestrator, the operator listener
//! and every signal worker.

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownPhase, ShutdownSignal, ShutdownToken,
};
