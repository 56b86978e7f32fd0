pub mod command;
pub mod config;
pub mod logging;

pub use command::{Command, CommandError, CommandProcessor, CommandReply};
pub use config::{Cli, ConfigError, LogLevel, PropertyKey, ShellProperties};
pub use logging::{LoggingError, setup_logging};

use crate::reliability::OfflineRecovery;
use crate::sender::HttpClient;
use crate::shell::Shell;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct RecoveryTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The interactive sensor shell: one HTTP transport, one shell, an optional
/// periodic offline recovery task and a command loop.
pub struct App {
    processor: CommandProcessor<HttpClient>,
    recovery: Option<RecoveryTask>,
}

impl App {
    pub async fn from_properties(properties: ShellProperties) -> anyhow::Result<Self> {
        let transport = Arc::new(
            HttpClient::new(properties.client_config())
                .context("failed to create the sensor data client")?,
        );
        let shell = Shell::start(properties, transport.clone())
            .await
            .context("failed to start the sensor shell")?;

        let properties = shell.properties().clone();
        let recovery = match shell.offline_store() {
            Some(store)
                if properties.offline_recovery_enabled
                    && !properties.offline_recovery_interval.is_zero() =>
            {
                let job = Arc::new(OfflineRecovery::new(
                    store,
                    transport,
                    properties.host.clone(),
                    properties.ping_timeout,
                ));
                let cancel = CancellationToken::new();
                let handle = job.spawn_periodic(properties.offline_recovery_interval, cancel.clone());
                Some(RecoveryTask { cancel, handle })
            }
            _ => None,
        };

        info!(
            version = crate::VERSION,
            host = %properties.host,
            multishell = properties.multishell_enabled,
            "sensorshell ready"
        );

        Ok(Self {
            processor: CommandProcessor::new(shell),
            recovery,
        })
    }

    pub fn processor(&self) -> &CommandProcessor<HttpClient> {
        &self.processor
    }

    /// Reads commands until `quit`, end of input or Ctrl-C, writing one reply
    /// per command. The shell is always quit before this returns, even when
    /// the output can no longer be written; a failed quit or a failed write is
    /// the returned error.
    pub async fn run<R, W>(mut self, input: R, mut output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut final_reply = None;
        let mut write_error = None;
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = &mut ctrl_c => {
                    info!("Interrupted, shutting down");
                    break;
                }
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read command: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = self.processor.handle_line(&line).await;
            if let Err(e) = write_reply(&mut output, &reply).await {
                error!("Failed to write reply, shutting down: {e}");
                write_error = Some(e);
            }
            if reply.is_quit() {
                final_reply = Some(reply);
                break;
            }
            if write_error.is_some() {
                break;
            }
        }

        self.stop_recovery().await;

        let reply = match final_reply {
            Some(reply) => reply,
            None => {
                let reply = self.processor.execute(Command::Quit).await;
                if write_error.is_none()
                    && let Err(e) = write_reply(&mut output, &reply).await
                {
                    error!("Failed to write quit reply: {e}");
                    write_error = Some(e);
                }
                reply
            }
        };
        match (reply, write_error) {
            (CommandReply::Quit(Err(message)), Some(e)) => {
                Err(e.context(format!("shell quit failed: {message}")))
            }
            (CommandReply::Quit(Err(message)), None) => Err(anyhow::anyhow!(message)),
            (_, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    async fn stop_recovery(&mut self) {
        if let Some(task) = self.recovery.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Offline recovery task failed: {e}");
            }
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &CommandReply) -> anyhow::Result<()> {
    output.write_all(format!("{reply}\n").as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Binary entry point.
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.log_level) {
        eprintln!("Warning: {e}");
    }

    let properties = match cli.clone().into_properties() {
        Ok(properties) => properties,
        Err(e) => {
            warn!("Failed to load configuration, continuing without the file: {e}");
            Cli {
                config: None,
                ..cli
            }
            .into_properties()?
        }
    };

    let app = App::from_properties(properties).await?;
    app.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
}
