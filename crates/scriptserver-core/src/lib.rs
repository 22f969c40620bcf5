//! # scriptserver-core
//!
//! Core types shared by every ScriptServer crate.
//!
//! This crate provides the foundational pieces used across the workspace:
//! - Error type and result alias
//! - Statically composed configuration (TOML loadable)
//! - Console events derived from server output
//! - Wall clock abstraction for event timestamps

pub mod clock;
pub mod config;
pub mod error;
pub mod event;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CommandConfig, FlavorPatterns, JavaConfig, RconConfig, ScriptServerConfig};
pub use error::{Result, ScriptServerError};
pub use event::{CommandEvent, ConsoleEvent, EventKind, EventPayload};
