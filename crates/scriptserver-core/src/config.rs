//! Statically composed configuration.
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! flavor = "default"
//!
//! [java]
//! jar = "paper.jar"
//! path = "./server"
//!
//! [rcon]
//! port = 25575
//! password = "hunter2"
//!
//! [command]
//! prefix = "!"
//!
//! [flavors.paper]
//! ready = '^\[[\d:]{8} INFO\]: RCON running'
//! ```

use crate::error::{Result, ScriptServerError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the flavor every lookup falls back to
pub const DEFAULT_FLAVOR: &str = "default";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptServerConfig {
    /// Active flavor profile
    #[serde(default = "default_flavor")]
    pub flavor: String,
    /// Supervised Java process
    #[serde(default)]
    pub java: JavaConfig,
    /// Remote console connection
    #[serde(default)]
    pub rcon: RconConfig,
    /// Chat command routing
    #[serde(default)]
    pub command: CommandConfig,
    /// Per-flavor pattern overrides
    #[serde(default)]
    pub flavors: HashMap<String, FlavorPatterns>,
}

impl Default for ScriptServerConfig {
    fn default() -> Self {
        Self {
            flavor: default_flavor(),
            java: JavaConfig::default(),
            rcon: RconConfig::default(),
            command: CommandConfig::default(),
            flavors: HashMap::new(),
        }
    }
}

impl ScriptServerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScriptServerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with. Called by
    /// [`ScriptServerConfig::from_toml_str`]; configs built in code are
    /// checked when the server is created.
    pub fn validate(&self) -> Result<()> {
        self.rcon.validate()?;
        if self.command.prefix.is_empty() {
            return Err(ScriptServerError::Config(
                "command.prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Pattern overrides for the active flavor, if any
    pub fn active_flavor_patterns(&self) -> Option<&FlavorPatterns> {
        self.flavors.get(&self.flavor)
    }
}

fn default_flavor() -> String {
    DEFAULT_FLAVOR.to_string()
}

/// How to launch the server process
#[derive(Debug, Clone, Deserialize)]
pub struct JavaConfig {
    /// Java executable
    #[serde(default = "default_executable")]
    pub executable: String,
    /// JVM arguments placed before `-jar`
    #[serde(default = "default_jvm_args")]
    pub args: Vec<String>,
    /// Server jar, relative to `path`
    #[serde(default = "default_jar")]
    pub jar: String,
    /// Working directory of the server
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Copy server output to our stdout
    #[serde(default)]
    pub pipe_stdout: bool,
    /// Forward our stdin to the server
    #[serde(default = "default_true")]
    pub pipe_stdin: bool,
    /// Console command written to stdin before the process is killed
    #[serde(default = "default_stop_command")]
    pub stop_command: Option<String>,
    /// How long to wait for a graceful exit
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for JavaConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: default_jvm_args(),
            jar: default_jar(),
            path: default_path(),
            pipe_stdout: false,
            pipe_stdin: true,
            stop_command: default_stop_command(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl JavaConfig {
    /// Full argument list: `<jvm-args> -jar <jar> nogui`
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-jar".to_string());
        args.push(self.jar.clone());
        args.push("nogui".to_string());
        args
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Stop command, if graceful shutdown is enabled. TOML has no null, so an
    /// empty string disables it.
    pub fn graceful_stop_command(&self) -> Option<&str> {
        self.stop_command.as_deref().filter(|cmd| !cmd.is_empty())
    }
}

fn default_executable() -> String {
    "java".to_string()
}
fn default_jvm_args() -> Vec<String> {
    vec!["-Xmx1024M".to_string(), "-Xms1024M".to_string()]
}
fn default_jar() -> String {
    "server.jar".to_string()
}
fn default_path() -> PathBuf {
    PathBuf::from("./server")
}
fn default_true() -> bool {
    true
}
fn default_stop_command() -> Option<String> {
    Some("stop".to_string())
}
fn default_stop_timeout_ms() -> u64 {
    10_000
}

/// RCON connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct RconConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_password")]
    pub password: String,
    /// Interval between command dispatches
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
    /// Delay before retrying a refused connection
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long a dispatched command may wait for its response
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: default_password(),
            buffer_ms: default_buffer_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl RconConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_ms == 0 {
            return Err(ScriptServerError::Config(
                "rcon.buffer_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn buffer(&self) -> Duration {
        Duration::from_millis(self.buffer_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    25575
}
fn default_password() -> String {
    "0000".to_string()
}
fn default_buffer_ms() -> u64 {
    100
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Chat command settings
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Prefix that marks a chat message as a command
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    "~".to_string()
}

/// Regex overrides for one flavor. Unset entries fall back to the default
/// flavor's matcher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlavorPatterns {
    pub ready: Option<String>,
    pub chat: Option<String>,
    pub login: Option<String>,
    pub logout: Option<String>,
    pub achievement: Option<String>,
    pub started: Option<String>,
    pub stopped: Option<String>,
}
