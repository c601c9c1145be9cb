//! OpenAI-compatible chat completions client (OpenRouter by default)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::DecisionOracle;
use crate::config::OracleConfig;
use crate::error::{BotError, Result};
use crate::execution::RetryPolicy;

/// Returned when the model answers with nothing
pub const EMPTY_RESPONSE_FALLBACK: &str = r#"[{"analysis":"Empty LLM response","action":"HOLD"}]"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenRouterClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Zeroizing<String>,
    retry: RetryPolicy,
}

impl OpenRouterClient {
    pub fn new(config: &OracleConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = config.api_key()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BotError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            retry,
        })
    }

    async fn chat_once(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage::new("system", system),
                ChatMessage::new("user", user),
            ],
            max_tokens: 3500,
            temperature: 0.7,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.as_str())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match BotError::from_status(status.as_u16(), "oracle request", &body) {
                // Reported, not fatal: a bad key at runtime degrades to HOLD
                BotError::Auth(detail) | BotError::OrderRejected(detail) => BotError::Oracle(detail),
                other => other,
            });
        }

        let body: ChatResponse = response.json().await?;
        Ok(extract_content(body))
    }
}

fn extract_content(response: ChatResponse) -> String {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        warn!("Empty response from oracle");
        EMPTY_RESPONSE_FALLBACK.to_string()
    } else {
        content
    }
}

#[async_trait]
impl DecisionOracle for OpenRouterClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        debug!("Requesting decision from {}", self.model);
        self.retry
            .run("oracle request", None, || self.chat_once(system, user))
            .await
    }
}
