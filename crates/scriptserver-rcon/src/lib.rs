//! Source RCON client for ScriptServer
//!
//! Commands are queued and dispatched one per tick of the configured buffer
//! interval, so a busy script cannot flood the server's RCON listener:
//!
//! - **Codec**: packet framing and reassembly ([`codec`])
//! - **Client**: connection, authentication and request correlation
//!   ([`RconClient`])
//!
//! Every queued or in-flight command fails with
//! [`ScriptServerError::Disconnected`](scriptserver_core::ScriptServerError)
//! when the connection goes away, and with `Timeout` when the server never
//! answers.

mod client;
pub mod codec;
mod pending;

pub use client::{ConnectionState, RconClient, RconEvent, ResponseFuture};
pub use codec::{FrameBuffer, PacketType, RconPacket};
