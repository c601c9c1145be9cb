use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;
use crate::market_data::MarketDataSource;

use super::{BinanceClient, ExchangeClient, PaperExchange};

/// Create the runtime exchange client from `AppConfig`.
///
/// Dry runs get a paper exchange seeded with the configured quote balance.
/// Live runs need credentials; their absence is a fatal error.
pub fn build_exchange_client(
    config: &AppConfig,
    dry_run: bool,
    market_data: Arc<dyn MarketDataSource>,
) -> Result<Arc<dyn ExchangeClient>> {
    if dry_run {
        info!(
            "Dry run: paper exchange with {} {}",
            config.execution.paper_quote_balance, config.trading.quote_asset
        );
        return Ok(Arc::new(PaperExchange::new(
            market_data,
            &config.trading.base_asset,
            &config.trading.quote_asset,
            rust_decimal::Decimal::ZERO,
            config.execution.paper_quote_balance,
        )));
    }

    let credentials = config.exchange.credentials()?;
    let client = BinanceClient::new(
        &config.exchange.rest_url,
        credentials,
        config.exchange.recv_window_ms,
        Duration::from_secs(config.exchange.timeout_secs),
    )?;
    info!("Live exchange: {}", config.exchange.rest_url);
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::exchange::ExchangeKind;
    use crate::market_data::MockMarketDataSource;

    #[test]
    fn test_dry_run_builds_paper_exchange() {
        let config = sample_config();
        let client =
            build_exchange_client(&config, true, Arc::new(MockMarketDataSource::new())).unwrap();
        assert_eq!(client.kind(), ExchangeKind::Paper);
        assert!(client.is_dry_run());
    }

    #[test]
    fn test_live_builds_binance_client() {
        let mut config = sample_config();
        config.exchange.api_key = Some("key".into());
        config.exchange.api_secret = Some("secret".into());
        let client =
            build_exchange_client(&config, false, Arc::new(MockMarketDataSource::new())).unwrap();
        assert_eq!(client.kind(), ExchangeKind::Binance);
    }
}
