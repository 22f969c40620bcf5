//! Error types for ScriptServer

use std::time::Duration;
use thiserror::Error;

/// Result type for ScriptServer operations
pub type Result<T> = std::result::Result<T, ScriptServerError>;

/// ScriptServer error types
#[derive(Debug, Error)]
pub enum ScriptServerError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed data on the RCON wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// RCON connection or authentication failure
    #[error("RCON error: {0}")]
    Rcon(String),

    /// Supervised process failure
    #[error("Process error: {0}")]
    Process(String),

    /// Process was started while a previous one is still running
    #[error("Server process already running")]
    AlreadyRunning,

    /// Operation needs a running process
    #[error("Server process not running")]
    NotRunning,

    /// Command was dropped because the RCON connection went away
    #[error("RCON disconnected before the command was answered")]
    Disconnected,

    /// Command was not answered in time
    #[error("RCON request timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Console pattern failed to compile
    #[error("Invalid pattern for {name}: {reason}")]
    Pattern { name: String, reason: String },
}

impl From<toml::de::Error> for ScriptServerError {
    fn from(err: toml::de::Error) -> Self {
        ScriptServerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_duration() {
        let err = ScriptServerError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "RCON request timed out after 1.5s");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ScriptServerError = io.into();
        assert!(matches!(err, ScriptServerError::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }
}
