//! Operator notifications over a chat webhook
//!
//! Delivery is best effort: failures are logged and never reach the caller.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::NotificationConfig;
use crate::domain::OrderSide;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    OrderFilled {
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        /// "oracle" or the strategy identity that raised it
        source: String,
    },
    OrderFailed {
        side: OrderSide,
        reason: String,
    },
    CycleFailed {
        reason: String,
    },
    ShuttingDown {
        reason: String,
    },
}

impl Notification {
    pub fn render(&self) -> String {
        match self {
            Notification::OrderFilled {
                side,
                quantity,
                price,
                source,
            } => {
                let emoji = if *side == OrderSide::Buy { "🟢" } else { "🔴" };
                format!(
                    "{} FILLED {} {} @ {} ({})\nNotional: {}",
                    emoji,
                    side,
                    quantity,
                    price,
                    source,
                    (quantity * price).round_dp(2)
                )
            }
            Notification::OrderFailed { side, reason } => {
                format!("⚠️ {} order failed: {}", side, reason)
            }
            Notification::CycleFailed { reason } => format!("⚠️ Cycle failed: {}", reason),
            Notification::ShuttingDown { reason } => format!("🛑 Shutting down: {}", reason),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

#[derive(Serialize)]
struct WebhookMessage {
    msg_type: &'static str,
    content: WebhookContent,
}

#[derive(Serialize)]
struct WebhookContent {
    text: String,
}

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Arc<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            client,
            webhook_url,
        })
    }

    /// `None` when no webhook is configured
    pub fn from_config(config: &NotificationConfig) -> Option<Arc<Self>> {
        config
            .webhook_url
            .as_ref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                info!("Webhook notifications enabled");
                Self::new(url.trim().to_string())
            })
    }

    pub async fn send_message(&self, text: &str) -> std::result::Result<(), String> {
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent {
                text: text.to_string(),
            },
        };

        match self.client.post(&self.webhook_url).json(&message).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Notification sent");
                Ok(())
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Err(format!("HTTP {}: {}", status, body))
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) {
        if let Err(e) = self.send_message(&notification.render()).await {
            error!("Failed to send notification: {}", e);
        }
    }
}
