//! Source RCON wire format
//!
//! ```text
//! offset 0   i32  size (bytes following this field)
//! offset 4   i32  request id
//! offset 8   i32  packet type
//! offset 12  ...  body (UTF-8)
//! last 2          0x00 0x00
//! ```
//!
//! All integers are little-endian.
//! Protocol spec: https://developer.valvesoftware.com/wiki/Source_RCON_Protocol

use scriptserver_core::{Result, ScriptServerError};

/// RCON packet type constants
pub mod packet_type {
    /// Authenticate with password
    pub const AUTH: i32 = 3;
    /// Execute a command
    pub const EXEC_COMMAND: i32 = 2;
    /// Authentication result (shares the value of EXEC_COMMAND)
    pub const AUTH_RESPONSE: i32 = 2;
    /// Command output
    pub const RESPONSE_VALUE: i32 = 0;
}

/// Request id carried by the auth packet
pub const AUTH_REQUEST_ID: i32 = 0x123;

/// Exec request ids count up from here; the first command uses `BASE + 1`
pub const EXEC_REQUEST_ID_BASE: i32 = 0x321;

/// Request id the server answers with when the password is wrong
pub const AUTH_FAILED_ID: i32 = -1;

/// id(4) + type(4) + two null terminators
const HEADER_LEN: usize = 10;

/// Largest `size` field we are willing to buffer
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Outgoing packet kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Execute a command
    ExecCommand,
    /// Authenticate with password
    Auth,
}

impl PacketType {
    /// Get the wire protocol value
    pub fn as_i32(self) -> i32 {
        match self {
            PacketType::ExecCommand => packet_type::EXEC_COMMAND,
            PacketType::Auth => packet_type::AUTH,
        }
    }
}

/// A single RCON packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    /// Byte count after the size field
    pub size: i32,
    pub request_id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl RconPacket {
    /// Create an outgoing packet
    pub fn new(request_id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            size: (HEADER_LEN + body.len()) as i32,
            request_id,
            packet_type: packet_type.as_i32(),
            body,
        }
    }

    /// Serialize packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self.packet_type, self.request_id, &self.body)
    }
}

/// Serialize a packet. The body must not contain interior null bytes.
pub fn encode(packet_type: i32, request_id: i32, body: &str) -> Vec<u8> {
    let body_bytes = body.as_bytes();
    let size = HEADER_LEN + body_bytes.len();

    let mut buf = Vec::with_capacity(4 + size);
    buf.extend_from_slice(&(size as i32).to_le_bytes());
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&packet_type.to_le_bytes());
    buf.extend_from_slice(body_bytes);
    buf.push(0); // Body null terminator
    buf.push(0); // Packet null terminator

    buf
}

/// Parse one complete frame, size prefix included.
///
/// Fails if `bytes` is shorter than the minimum frame or than the declared
/// size. Trailing bytes past the declared size are ignored.
pub fn decode(bytes: &[u8]) -> Result<RconPacket> {
    let size = frame_size(bytes)?.ok_or_else(|| {
        ScriptServerError::Protocol(format!(
            "RCON packet too short: {} bytes",
            bytes.len()
        ))
    })?;

    if bytes.len() < 4 + size {
        return Err(ScriptServerError::Protocol(format!(
            "RCON packet truncated: declared {} bytes, have {}",
            size,
            bytes.len() - 4
        )));
    }

    let read_i32 = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let request_id = read_i32(4);
    let packet_type = read_i32(8);
    let body = String::from_utf8_lossy(&bytes[12..4 + size - 2]).into_owned();

    Ok(RconPacket {
        size: size as i32,
        request_id,
        packet_type,
        body,
    })
}

/// Read and validate the size prefix. `None` means fewer than 4 bytes.
fn frame_size(bytes: &[u8]) -> Result<Option<usize>> {
    if bytes.len() < 4 {
        return Ok(None);
    }

    let size = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if size < HEADER_LEN as i32 {
        return Err(ScriptServerError::Protocol(format!(
            "RCON packet size {} below minimum {}",
            size, HEADER_LEN
        )));
    }
    if size as usize > MAX_FRAME_SIZE {
        return Err(ScriptServerError::Protocol(format!(
            "RCON packet too large: {} bytes",
            size
        )));
    }

    Ok(Some(size as usize))
}

/// Reassembles frames from arbitrarily split socket reads
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete packet, if one is buffered
    pub fn next_packet(&mut self) -> Result<Option<RconPacket>> {
        let Some(size) = frame_size(&self.buffer)? else {
            return Ok(None);
        };
        if self.buffer.len() < 4 + size {
            return Ok(None);
        }

        let packet = decode(&self.buffer[..4 + size])?;
        self.buffer.drain(..4 + size);
        Ok(Some(packet))
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_serialization() {
        let packet = RconPacket::new(1, PacketType::Auth, "password123");
        let bytes = packet.to_bytes();

        // Size should be 4 + 4 + 11 + 2 = 21
        assert_eq!(bytes.len(), 4 + 21);
        assert_eq!(packet.size, 21);

        let size = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(size, 21);

        let ptype = i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(ptype, PacketType::Auth.as_i32());

        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
    }

    #[test]
    fn test_packet_deserialization() {
        let original = RconPacket::new(42, PacketType::ExecCommand, "test command");
        let parsed = decode(&original.to_bytes()).unwrap();

        assert_eq!(parsed, original);
        assert_eq!(parsed.request_id, 42);
        assert_eq!(parsed.packet_type, packet_type::EXEC_COMMAND);
        assert_eq!(parsed.body, "test command");
    }

    #[test]
    fn test_body_roundtrip_preserves_text() {
        for body in ["", "list", "say §aHello §r wörld ✓", "tellraw @a {\"text\":\"日本語\"}"] {
            let parsed = decode(&encode(packet_type::EXEC_COMMAND, 0x322, body)).unwrap();
            assert_eq!(parsed.body, body);
            assert_eq!(parsed.request_id, 0x322);
            assert_eq!(parsed.packet_type, packet_type::EXEC_COMMAND);
        }
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let bytes = encode(packet_type::RESPONSE_VALUE, 7, "hello");
        assert!(decode(&bytes[..3]).is_err());
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_size() {
        let mut bytes = encode(packet_type::RESPONSE_VALUE, 7, "");
        bytes[..4].copy_from_slice(&4i32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(ScriptServerError::Protocol(_))));

        bytes[..4].copy_from_slice(&((MAX_FRAME_SIZE as i32) + 1).to_le_bytes());
        assert!(matches!(decode(&bytes), Err(ScriptServerError::Protocol(_))));
    }

    #[test]
    fn test_frame_buffer_reassembles_split_frame() {
        let bytes = encode(packet_type::RESPONSE_VALUE, 0x322, "There are 0 of a max of 20 players online");
        let mut frames = FrameBuffer::new();

        for split in [1, 4, 11, bytes.len() - 1] {
            frames.extend(&bytes[..split]);
            assert_eq!(frames.next_packet().unwrap(), None);
            frames.extend(&bytes[split..]);
            let packet = frames.next_packet().unwrap().unwrap();
            assert_eq!(packet.body, "There are 0 of a max of 20 players online");
            assert_eq!(frames.pending_len(), 0);
        }
    }

    #[test]
    fn test_frame_buffer_splits_coalesced_frames() {
        let mut chunk = encode(packet_type::AUTH_RESPONSE, AUTH_REQUEST_ID, "");
        chunk.extend(encode(packet_type::RESPONSE_VALUE, 0x322, "first"));
        chunk.extend(&encode(packet_type::RESPONSE_VALUE, 0x323, "second")[..6]);

        let mut frames = FrameBuffer::new();
        frames.extend(&chunk);

        assert_eq!(frames.next_packet().unwrap().unwrap().request_id, AUTH_REQUEST_ID);
        assert_eq!(frames.next_packet().unwrap().unwrap().body, "first");
        assert_eq!(frames.next_packet().unwrap(), None);
        assert_eq!(frames.pending_len(), 6);
    }
}
