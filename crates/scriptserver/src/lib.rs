//! # scriptserver
//!
//! Supervises a Minecraft server process and exposes one scripting surface
//! on top of it.
//!
//! This crate provides:
//! - `ScriptServer`, which starts the process, waits for the readiness line,
//!   and then connects RCON
//! - A typed event bus (`ServerEvent`) carrying console lines, parsed
//!   events, chat commands and RCON lifecycle changes
//! - Chat command registration through `CommandHandler`
//!
//! ```no_run
//! use scriptserver::{ScriptServer, ServerEvent};
//! use scriptserver_core::{CommandEvent, ScriptServerConfig};
//!
//! # async fn run() -> scriptserver_core::Result<()> {
//! let server = ScriptServer::new(ScriptServerConfig::load("scriptserver.toml")?)?;
//! server.register_command("time", |server: ScriptServer, _event: CommandEvent| async move {
//!     server.submit_command("time query daytime").await.map(|_| ())
//! });
//! server.start().await?;
//!
//! let mut events = server.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let ServerEvent::ProcessExited { .. } = event {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
mod server;

pub use command::{CommandHandler, CommandParser, CommandRegistry};
pub use scriptserver_events::FlavorMatcherSet;
pub use scriptserver_process::LaunchSpec;
pub use scriptserver_rcon::{ConnectionState, RconEvent, ResponseFuture};
pub use server::{ScriptServer, ServerEvent};
