//! Bounded exponential backoff for transient exchange and data errors.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::coordination::ShutdownToken;
use crate::error::{BotError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay (0.0 disables)
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter_factor: 0.1,
        }
    }

    /// Same attempt cap with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);

        let jitter_range = capped.as_secs_f64() * self.jitter_factor.max(0.0);
        if jitter_range <= 0.0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt cap is reached. The last error is returned on exhaustion.
    ///
    /// When a shutdown token is given, no further attempt is started once
    /// shutdown has begun and backoff sleeps are cut short.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        shutdown: Option<&ShutdownToken>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            if attempts > 0 && shutdown.map_or(false, |s| s.is_shutdown_requested()) {
                return Err(BotError::ShuttingDown);
            }
            attempts += 1;

            match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{} succeeded on attempt {}", what, attempts);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempts >= self.max_attempts {
                        warn!("{} failed after {} attempts: {}", what, attempts, e);
                        return Err(e);
                    }

                    let delay = self.backoff_duration(attempts);
                    warn!(
                        "{} attempt {} failed: {}. Retrying in {:?}",
                        what, attempts, e, delay
                    );

                    match shutdown {
                        Some(token) => {
                            let mut token = token.clone();
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = token.wait_for_shutdown() => return Err(BotError::ShuttingDown),
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(10))
        };
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_duration(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_duration(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_duration(30), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("fetch", None, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BotError::ExchangeUnavailable("503".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::immediate(5)
            .run("submit", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BotError::OrderRejected("insufficient balance".into()))
            })
            .await;
        assert!(matches!(result, Err(BotError::OrderRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::immediate(3)
            .run("fetch", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BotError::RateLimited("429".into()))
            })
            .await;
        assert!(matches!(result, Err(BotError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();
        shutdown.request_shutdown(ShutdownSignal::Operator);

        let policy = RetryPolicy::new(3, Duration::from_secs(60), Duration::from_secs(60));
        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(1),
            policy.run("fetch", Some(&token), || async {
                Err(BotError::ExchangeUnavailable("503".into()))
            }),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(BotError::ShuttingDown)));
    }
}
