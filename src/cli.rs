use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::persistence::{FileStateRepository, PositionStore, StateRepository, POSITION_KEY};

#[derive(Parser)]
#[command(name = "candlebot")]
#[command(version = "0.1.0")]
#[command(about = "Spot trading bot driven by an LLM oracle and rule-based signal workers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Paper-trade against live market data (no real orders)
    #[arg(long, env = "BOT_DRY_RUN")]
    pub dry_run: bool,

    /// Configuration directory (default.toml, <BOT_ENV>.toml)
    #[arg(short, long, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the trading bot (default)
    Run,
    /// Validate configuration and credentials, then exit
    CheckConfig,
    /// Print the persisted position and worker states
    Status,
}

/// Print every configuration problem; `Ok(false)` when there are any
pub fn check_config(config: &AppConfig, dry_run: bool) -> Result<bool> {
    let mut ok = true;
    if let Err(problems) = config.validate() {
        ok = false;
        for problem in problems {
            println!("\x1b[31m✗ {}\x1b[0m", problem);
        }
    }
    if !dry_run {
        if let Err(e) = config.exchange.credentials() {
            ok = false;
            println!("\x1b[31m✗ {}\x1b[0m", e);
        }
    }
    if let Err(e) = config.oracle.api_key() {
        ok = false;
        println!("\x1b[31m✗ {}\x1b[0m", e);
    }

    if ok {
        println!("\x1b[32m✓ Configuration OK\x1b[0m");
        println!("  Symbol:         {}", config.trading.symbol);
        println!("  Cycle interval: {}s", config.trading.cycle_interval_secs);
        println!("  Position TTL:   {}s", config.trading.position_ttl_secs);
        println!("  Exchange:       {}", if dry_run { "paper" } else { config.exchange.rest_url.as_str() });
        println!("  Oracle model:   {}", config.oracle.model);
        println!("  State dir:      {}", config.storage.state_dir.display());
    }
    Ok(ok)
}

/// Position summary and one line per persisted worker state
pub async fn status_report(repo: Arc<dyn StateRepository>) -> Result<String> {
    let positions = PositionStore::load(repo.clone()).await?;
    let mut lines = Vec::new();

    match positions.current().await {
        Some(p) => lines.push(format!(
            "Position: {} {} @ {} since {}",
            p.side,
            p.size,
            p.entry_price,
            p.opened_at.to_rfc3339()
        )),
        None => lines.push("Position: none".to_string()),
    }

    let records: Vec<(String, Value)> = repo
        .list()
        .await?
        .into_iter()
        .filter(|(name, _)| name != POSITION_KEY)
        .collect();
    if records.is_empty() {
        lines.push("Worker states: none".to_string());
    } else {
        lines.push(format!("Worker states ({}):", records.len()));
        for (name, value) in records {
            lines.push(format!("  {} {}", name, value));
        }
    }
    Ok(lines.join("\n"))
}

pub async fn show_status(config: &AppConfig) -> Result<()> {
    let repo: Arc<dyn StateRepository> =
        Arc::new(FileStateRepository::new(config.storage.state_dir.clone()));
    println!("{}", status_report(repo).await?);
    Ok(())
}
