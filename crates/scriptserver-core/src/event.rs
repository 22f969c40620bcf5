//! Console event types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of event derived from a console line.
///
/// The order of [`EventKind::ALL`] is the order in which matchers are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Chat,
    Login,
    Logout,
    Achievement,
    Started,
    Stopped,
}

impl EventKind {
    /// Matcher evaluation order; the first kind that matches a line wins
    pub const ALL: [EventKind; 6] = [
        EventKind::Chat,
        EventKind::Login,
        EventKind::Logout,
        EventKind::Achievement,
        EventKind::Started,
        EventKind::Stopped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Login => "login",
            EventKind::Logout => "logout",
            EventKind::Achievement => "achievement",
            EventKind::Started => "started",
            EventKind::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields extracted from a console line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Player chat message
    Chat { player: String, message: String },
    /// Player joined, with the address they connected from
    Login { player: String, ip: String },
    /// Player left
    Logout { player: String, reason: String },
    /// Player earned an advancement
    Achievement { player: String, achievement: String },
    /// Server finished starting
    Started,
    /// Server began shutting down
    Stopped,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Chat { .. } => EventKind::Chat,
            EventPayload::Login { .. } => EventKind::Login,
            EventPayload::Logout { .. } => EventKind::Logout,
            EventPayload::Achievement { .. } => EventKind::Achievement,
            EventPayload::Started => EventKind::Started,
            EventPayload::Stopped => EventKind::Stopped,
        }
    }
}

/// Event derived from a console line.
///
/// Immutable once emitted; subscribers each receive their own clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEvent {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,

    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ConsoleEvent {
    pub fn new(timestamp: u64, payload: EventPayload) -> Self {
        Self { timestamp, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Chat message addressed to a registered command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Player who typed the command
    pub player: String,

    /// Command name, lowercased
    pub command: String,

    /// Remaining words of the message
    #[serde(default)]
    pub args: Vec<String>,

    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}
