//! Operator-facing surface: control commands, the console front end, the
//! wallet performance ledger and webhook notifications.

pub mod commands;
pub mod console;
pub mod ledger;
pub mod notifier;

pub use commands::{ControlHandle, ControlListener, ControlRequest, OperatorCommand};
pub use console::{run_console, spawn_stdin_console};
pub use ledger::{BalanceLedger, BalanceSnapshot, HorizonChange};
pub use notifier::{Notification, Notifier, WebhookNotifier};
