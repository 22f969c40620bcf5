//! Supervision of the Minecraft server process
//!
//! [`ProcessSupervisor`] spawns the server, turns its stdout and stderr into
//! [`ProcessEvent::Console`] lines, accepts raw console input, and reports
//! exit with [`ProcessEvent::Stopped`].

mod lines;
mod supervisor;

pub use lines::{LineSplitter, MAX_LINE_LEN};
pub use supervisor::{LaunchSpec, ProcessEvent, ProcessSupervisor};
