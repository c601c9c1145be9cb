use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // Order execution errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order execution failed: {0}")]
    Order(#[from] OrderError),

    // Decision / strategy errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    // Persistence errors
    #[error("Corrupt state record '{key}': {reason}")]
    CorruptState { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Whether the caller may keep running after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Safe to continue: skip the iteration, drop the decision, report.
    Recoverable,
    /// Startup must abort.
    Fatal,
}

impl BotError {
    /// Classify the error for the top-level policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            BotError::Config(_) | BotError::MissingCredentials(_) | BotError::Auth(_) => {
                ErrorClass::Fatal
            }
            _ => ErrorClass::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Transient errors are retried with backoff; everything else aborts the
    /// current operation immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            BotError::Http(e) => {
                if e.is_decode() || e.is_builder() {
                    return false;
                }
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map_or(true, |s| s.is_server_error())
            }
            BotError::RateLimited(_)
            | BotError::ExchangeUnavailable(_)
            | BotError::MarketDataUnavailable(_) => true,
            BotError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Map a non-success HTTP status from a venue or data endpoint.
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        let detail = format!("{} failed: status={} body={}", context, status, body.trim());
        match status {
            429 | 418 => BotError::RateLimited(detail),
            401 | 403 => BotError::Auth(detail),
            500..=599 => BotError::ExchangeUnavailable(detail),
            400..=499 => BotError::OrderRejected(detail),
            _ => BotError::Internal(detail),
        }
    }
}

/// Specific error types for order execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Max retries exceeded: {attempts}")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("Order {order_id} not filled (status {status})")]
    NotFilled { order_id: String, status: String },

    #[error("Quantity {quantity} below minimum lot {min_qty}")]
    BelowMinimumLot {
        quantity: rust_decimal::Decimal,
        min_qty: rust_decimal::Decimal,
    },

    #[error("Invalid order: {0}")]
    Invalid(String),
}
