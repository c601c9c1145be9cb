pub mod binance;
pub mod factory;
pub mod paper;
mod traits;

pub use binance::BinanceClient;
pub use factory::build_exchange_client;
pub use paper::PaperExchange;
#[cfg(test)]
pub use traits::MockExchangeClient;
pub use traits::{ExchangeClient, ExchangeKind};
