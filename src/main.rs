use anyhow::Context;
use candlebot::cli::{self, Cli, Commands};
use candlebot::config::{AppConfig, LoggingConfig};
use candlebot::control::{spawn_stdin_console, ControlHandle};
use candlebot::coordination::{install_signal_handlers, GracefulShutdown};
use candlebot::orchestrator::build_runtime;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    let dry_run = cli.dry_run || config.execution.dry_run;

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            init_logging_simple();
            if !cli::check_config(&config, dry_run)? {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            init_logging_simple();
            cli::show_status(&config).await?;
        }
        Commands::Run => {
            init_logging(&config.logging);
            run_bot(&config, dry_run).await?;
        }
    }
    Ok(())
}

async fn run_bot(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    info!(
        "Starting candlebot on {} ({})",
        config.trading.symbol,
        if dry_run { "dry run" } else { "live" }
    );

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone()).await;

    let (orchestrator, signals) = match build_runtime(config, dry_run, shutdown.clone()).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    let (control, requests) = ControlHandle::channel(8);
    let listener = orchestrator.control_listener().spawn(requests);
    let console = spawn_stdin_console(control, shutdown.token());

    let result = orchestrator.run(signals).await;

    // The console owns the last control handle; the listener ends once it
    // is gone.
    console.abort();
    let _ = console.await;
    let _ = listener.await;

    match result {
        Ok(()) => {
            info!("candlebot stopped");
            Ok(())
        }
        Err(e) => {
            error!("candlebot stopped on fatal error: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},candlebot=debug", logging.level))
    });

    // tracing_appender::rolling::daily aborts if it cannot create the
    // initial file, so writability is checked first.
    let file_layer = logging.dir.as_ref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir.display(),
                e
            );
            return None;
        }
        let test_path = log_dir.join(".candlebot_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "candlebot.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Lives for the whole process
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir.display(),
                    e
                );
                None
            }
        }
    });

    let (json_layer, text_layer) = if logging.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, logging.dir.as_ref()) {
        eprintln!("Logging to: {}/candlebot.log", dir.display());
    }
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
