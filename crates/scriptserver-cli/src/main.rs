//! ScriptServer
//!
//! Starts the configured Minecraft server, connects RCON once it is ready,
//! and logs every event to stderr until the server exits or Ctrl-C is
//! pressed.
//!
//! Usage: `scriptserver [config.toml]`. Without an argument,
//! `scriptserver.toml` in the working directory is used if present.

use anyhow::{Context, Result, bail};
use scriptserver::{ScriptServer, ServerEvent};
use scriptserver_core::ScriptServerConfig;
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG: &str = "scriptserver.toml";

fn load_config() -> Result<ScriptServerConfig> {
    match std::env::args().nth(1) {
        Some(path) => ScriptServerConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path)),
        None if Path::new(DEFAULT_CONFIG).exists() => ScriptServerConfig::load(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG)),
        None => {
            info!("No {} found, using defaults", DEFAULT_CONFIG);
            Ok(ScriptServerConfig::default())
        }
    }
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Console(line) => debug!("console: {}", line),
        ServerEvent::Game(event) => match serde_json::to_string(event) {
            Ok(json) => info!("{} {}", event.kind(), json),
            Err(e) => warn!("Failed to serialize {} event: {}", event.kind(), e),
        },
        ServerEvent::Command(command) => info!(
            "command ~{} from {} {:?}",
            command.command, command.player, command.args
        ),
        ServerEvent::Rcon(event) => info!("rcon {:?}", event),
        ServerEvent::ProcessExited { code } => info!("server exited with code {:?}", code),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so piped server output on stdout stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config()?;
    info!(
        "ScriptServer starting {} in {}",
        config.java.jar,
        config.java.path.display()
    );

    let server = ScriptServer::new(config)?;
    let mut events = server.subscribe();
    server.start().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let exit_code = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping server");
                server.stop().await;
                break None;
            }
            event = events.recv() => match event {
                Ok(ServerEvent::ProcessExited { code }) => {
                    log_event(&ServerEvent::ProcessExited { code });
                    break code;
                }
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => warn!("Dropped {} events", missed),
                Err(RecvError::Closed) => break None,
            },
        }
    };

    server.stop().await;
    match exit_code {
        Some(code) if code != 0 => bail!("Server exited with code {}", code),
        _ => Ok(()),
    }
}
