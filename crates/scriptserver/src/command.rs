//! Chat command routing

use crate::server::ScriptServer;
use async_trait::async_trait;
use regex::Regex;
use scriptserver_core::{CommandEvent, ConsoleEvent, EventPayload, Result, ScriptServerError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Callback for a registered chat command.
///
/// Implemented for any `Fn(ScriptServer, CommandEvent) -> impl Future<Output = Result<()>>`,
/// so most handlers are plain async closures.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, server: ScriptServer, event: CommandEvent) -> Result<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(ScriptServer, CommandEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, server: ScriptServer, event: CommandEvent) -> Result<()> {
        (self)(server, event).await
    }
}

/// Handlers keyed by lowercase command name
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Vec<Arc<dyn CommandHandler>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. Several handlers may share one name; all of them run.
    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers
            .entry(name.to_lowercase())
            .or_default()
            .push(handler);
    }

    /// Handlers for `name`, matched case-insensitively
    pub fn handlers_for(&self, name: &str) -> Vec<Arc<dyn CommandHandler>> {
        self.handlers
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Registered command names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Total number of handlers
    pub fn count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

/// Recognizes `<prefix><name> [args...]` in chat messages
#[derive(Debug, Clone)]
pub struct CommandParser {
    pattern: Regex,
}

impl CommandParser {
    pub fn new(prefix: &str) -> Result<Self> {
        let pattern = format!(r"(?i)^{}(\w+)\s?(.*)", regex::escape(prefix));
        let pattern = Regex::new(&pattern).map_err(|e| ScriptServerError::Pattern {
            name: "command".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    /// Command carried by a chat event, if any. The name is lowercased and
    /// the rest of the message is split on whitespace.
    pub fn parse(&self, event: &ConsoleEvent) -> Option<CommandEvent> {
        let EventPayload::Chat { player, message } = &event.payload else {
            return None;
        };
        let caps = self.pattern.captures(message)?;

        Some(CommandEvent {
            player: player.clone(),
            command: caps[1].to_lowercase(),
            args: caps[2].split_whitespace().map(str::to_string).collect(),
            timestamp: event.timestamp,
        })
    }
}
