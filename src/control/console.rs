//! Line-based operator console (stdin by default)

use std::io::BufRead;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::commands::{ControlHandle, OperatorCommand};
use crate::coordination::ShutdownToken;
use crate::error::Result;

const HELP: &str = "stop - stop bot\nstrategies - active strategies\nbalance - wallet performance\nlist - this list";

/// Read commands until EOF or shutdown. `stop` needs a `yes` on the next
/// line; anything else cancels it.
pub async fn run_console<W>(
    mut lines: mpsc::Receiver<String>,
    mut writer: W,
    handle: ControlHandle,
    mut shutdown: ShutdownToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut awaiting_confirmation = false;

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = shutdown.wait_for_shutdown() => break,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let reply = if awaiting_confirmation {
            awaiting_confirmation = false;
            if input.eq_ignore_ascii_case("yes") {
                handle.request(OperatorCommand::Stop).await?
            } else {
                "Stop cancelled.".to_string()
            }
        } else {
            match OperatorCommand::parse(input) {
                Some(OperatorCommand::Stop) => {
                    awaiting_confirmation = true;
                    "Are you sure you want to stop the bot? Type 'yes' to confirm.".to_string()
                }
                Some(command) => handle.request(command).await?,
                None if input.trim_start_matches('/').eq_ignore_ascii_case("list") => {
                    HELP.to_string()
                }
                None => "Unknown command - 'list' to see options.".to_string(),
            }
        };

        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Console on the process stdin/stdout. Lines are read on a detached
/// thread so a pending read never holds the process open at exit.
pub fn spawn_stdin_console(handle: ControlHandle, shutdown: ShutdownToken) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if let Err(e) = run_console(rx, tokio::io::stdout(), handle, shutdown).await {
            warn!("Operator console stopped: {}", e);
        }
    })
}
