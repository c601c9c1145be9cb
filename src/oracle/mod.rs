//! Decision oracle
//!
//! The oracle is an untrusted text model. [`DecisionPipeline`] builds the
//! prompt, calls the oracle, extracts decisions and records the artifacts.
//! It never fails: transport errors and unusable output become HOLD.

pub mod artifacts;
pub mod client;
pub mod processor;
pub mod prompt;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub use artifacts::ArtifactStore;
pub use client::OpenRouterClient;
pub use processor::process_raw;
pub use prompt::{OracleContext, Prompt};

use crate::domain::Decision;
use crate::error::Result;

/// Raw text returned when the oracle cannot be reached
pub const TRANSPORT_FAILURE_FALLBACK: &str = r#"[{"analysis":"LLM error","action":"HOLD"}]"#;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// One chat completion: system and user message in, raw text out
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct DecisionPipeline {
    oracle: Arc<dyn DecisionOracle>,
    artifacts: ArtifactStore,
}

impl DecisionPipeline {
    pub fn new(oracle: Arc<dyn DecisionOracle>, artifacts: ArtifactStore) -> Self {
        Self { oracle, artifacts }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Processed output of the previous cycle, used as prompt context
    pub async fn previous_decision(&self) -> Option<String> {
        self.artifacts.previous_processed().await.unwrap_or_else(|e| {
            warn!("Could not read previous decision: {}", e);
            None
        })
    }

    /// Ordered decisions for this cycle; never empty
    pub async fn decide(&self, ctx: &OracleContext) -> Vec<Decision> {
        let prompt = Prompt::build(ctx);
        if let Err(e) = self.artifacts.write_prompt(&prompt.render()).await {
            warn!("Failed to write prompt artifact: {}", e);
        }

        let raw = match self.oracle.complete(&prompt.system, &prompt.user).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Oracle call failed: {}", e);
                TRANSPORT_FAILURE_FALLBACK.to_string()
            }
        };
        if let Err(e) = self.artifacts.write_raw(&raw).await {
            warn!("Failed to write raw artifact: {}", e);
        }

        let decisions = process_raw(&raw);
        if let Err(e) = self.artifacts.write_processed(&decisions).await {
            warn!("Failed to write processed artifact: {}", e);
        }
        info!(
            "Oracle returned {} decision(s): {}",
            decisions.len(),
            decisions
                .iter()
                .map(|d| d.action.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        decisions
    }
}
