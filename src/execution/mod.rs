//! Order execution: retry policy, sizing and the order gateway.

pub mod gateway;
pub mod retry;
pub mod sizing;

pub use gateway::{Fill, GatewayConfig, OrderGateway};
pub use retry::RetryPolicy;
pub use sizing::{resolve_size, strategy_buy_size};
