use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::{BotError, Result};
use crate::execution::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub exchange: ExchangeConfig,
    pub market_data: MarketDataConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Spot pair traded by the bot (e.g., "BTCUSDT")
    pub symbol: String,
    /// Asset held while a position is open (e.g., "BTC")
    pub base_asset: String,
    /// Asset used to pay for buys (e.g., "USDT")
    pub quote_asset: String,
    /// Seconds between orchestrator cycles (default 4h)
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// A position at or beyond this age is purged at the start of a cycle
    #[serde(default = "default_position_ttl")]
    pub position_ttl_secs: u64,
    /// Size used by a strategy BUY when neither size nor size_pct is given
    #[serde(default = "default_strategy_order_size")]
    pub default_strategy_order_size: Decimal,
    /// Kline interval for the decision snapshot and for workers without a timeframe param
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    /// Number of klines fetched per snapshot (600 x 4h = 100 days)
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
}

fn default_cycle_interval() -> u64 {
    4 * 3600
}

fn default_position_ttl() -> u64 {
    4 * 3600
}

fn default_strategy_order_size() -> Decimal {
    rust_decimal_macros::dec!(0.01)
}

fn default_candle_interval() -> String {
    "4h".to_string()
}

fn default_candle_limit() -> u32 {
    600
}

impl TradingConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn position_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.position_ttl_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between two polls of a signal worker
    pub poll_interval_secs: u64,
    /// Bounded wait for a stopped worker to exit before it is aborted
    pub join_timeout_secs: u64,
    /// Retry attempts for a worker's data fetch
    pub fetch_max_attempts: u32,
    /// Capacity of the worker → gateway signal channel
    pub signal_channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            join_timeout_secs: 5,
            fetch_max_attempts: 3,
            signal_channel_capacity: 64,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum attempts for one order submission
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Enable dry run mode (paper exchange, no real orders)
    pub dry_run: bool,
    /// Starting quote balance of the paper exchange
    pub paper_quote_balance: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 2000,
            max_backoff_ms: 10_000,
            dry_run: false,
            paper_quote_balance: rust_decimal_macros::dec!(1000),
        }
    }
}

impl ExecutionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Signed REST endpoint used for orders and balances
    pub rest_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_recv_window() -> u64 {
    5000
}

fn default_http_timeout() -> u64 {
    10
}

/// Resolved exchange credentials. The secret is wiped on drop.
#[derive(Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
}

impl std::fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

impl ExchangeConfig {
    /// Config values win; `BINANCE_API_KEY` / `BINANCE_API_SECRET` are the fallback.
    pub fn credentials(&self) -> Result<ExchangeCredentials> {
        let api_key = non_empty(self.api_key.clone())
            .or_else(|| non_empty(std::env::var("BINANCE_API_KEY").ok()))
            .ok_or_else(|| BotError::MissingCredentials("BINANCE_API_KEY".to_string()))?;
        let api_secret = non_empty(self.api_secret.clone())
            .or_else(|| non_empty(std::env::var("BINANCE_API_SECRET").ok()))
            .ok_or_else(|| BotError::MissingCredentials("BINANCE_API_SECRET".to_string()))?;
        Ok(ExchangeCredentials {
            api_key,
            api_secret: Zeroizing::new(api_secret),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    /// Public REST endpoint for klines and prices
    pub rest_url: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// OpenAI-compatible chat completions base URL
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// Exchange fee rate quoted to the oracle (0.001 = 0.1%)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
}

fn default_oracle_timeout() -> u64 {
    300
}

fn default_fee_rate() -> Decimal {
    rust_decimal_macros::dec!(0.001)
}

impl OracleConfig {
    pub fn api_key(&self) -> Result<Zeroizing<String>> {
        non_empty(self.api_key.clone())
            .or_else(|| non_empty(std::env::var("OPENROUTER_API_KEY").ok()))
            .map(Zeroizing::new)
            .ok_or_else(|| BotError::MissingCredentials("OPENROUTER_API_KEY".to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the position record and strategy states
    pub state_dir: PathBuf,
    /// Directory for prompt / raw / processed decision artifacts
    pub artifacts_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("data/state"),
            artifacts_dir: PathBuf::from("data/artifacts"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationConfig {
    /// Webhook receiving operator notifications (fills, failures, shutdown)
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Self::with_defaults(Config::builder())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BOT__TRADING__SYMBOL, etc.)
            .add_source(
                Environment::with_prefix("BOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    fn with_defaults(
        builder: config::builder::ConfigBuilder<config::builder::DefaultState>,
    ) -> std::result::Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError>
    {
        builder
            .set_default("trading.symbol", "BTCUSDT")?
            .set_default("trading.base_asset", "BTC")?
            .set_default("trading.quote_asset", "USDT")?
            .set_default("exchange.rest_url", "https://testnet.binance.vision")?
            .set_default("market_data.rest_url", "https://api.binance.com")?
            .set_default("oracle.base_url", "https://openrouter.ai/api/v1")?
            .set_default("oracle.model", "deepseek/deepseek-r1")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.symbol.trim().is_empty() {
            errors.push("trading.symbol must not be empty".to_string());
        }
        if !self
            .trading
            .symbol
            .starts_with(self.trading.base_asset.as_str())
            || !self
                .trading
                .symbol
                .ends_with(self.trading.quote_asset.as_str())
        {
            errors.push(format!(
                "trading.symbol {} does not match {}/{}",
                self.trading.symbol, self.trading.base_asset, self.trading.quote_asset
            ));
        }
        if self.trading.cycle_interval_secs == 0 {
            errors.push("trading.cycle_interval_secs must be positive".to_string());
        }
        if self.trading.position_ttl_secs == 0 {
            errors.push("trading.position_ttl_secs must be positive".to_string());
        }
        if self.trading.default_strategy_order_size <= Decimal::ZERO {
            errors.push("trading.default_strategy_order_size must be positive".to_string());
        }
        if self.trading.candle_limit == 0 {
            errors.push("trading.candle_limit must be positive".to_string());
        }
        if self.workers.poll_interval_secs == 0 {
            errors.push("workers.poll_interval_secs must be positive".to_string());
        }
        if self.workers.fetch_max_attempts == 0 {
            errors.push("workers.fetch_max_attempts must be at least 1".to_string());
        }
        if self.workers.signal_channel_capacity == 0 {
            errors.push("workers.signal_channel_capacity must be positive".to_string());
        }
        if self.execution.max_retries == 0 {
            errors.push("execution.max_retries must be at least 1".to_string());
        }
        if self.execution.base_backoff_ms > self.execution.max_backoff_ms {
            errors.push("execution.base_backoff_ms exceeds execution.max_backoff_ms".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Startup check for everything that must be present before trading.
    /// Missing credentials are the one fatal class of error.
    pub fn require_credentials(&self) -> Result<()> {
        if let Err(problems) = self.validate() {
            return Err(BotError::Validation(problems.join("; ")));
        }
        if !self.execution.dry_run {
            self.exchange.credentials()?;
        }
        self.oracle.api_key()?;
        Ok(())
    }
}
