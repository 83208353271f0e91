//! Packet type exchanged with sessions and producers.
//!
//! Uses `bytes::Bytes` so a packet can sit in the overflow queue or be handed
//! to a session without copying its payload.
//!
//! # Example
//!
//! ```
//! use world_socket::protocol::{HeaderShape, Packet};
//!
//! let packet = Packet::from_slice(0x1DC, b"pong");
//! assert_eq!(packet.opcode(), 0x1DC);
//! assert_eq!(packet.encoded_len(HeaderShape::ServerToClient), 4 + 4);
//! ```

use bytes::Bytes;

use super::header::HeaderShape;

/// One application packet: an opcode and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet opcode.
    pub opcode: u32,
    /// Payload bytes, never encrypted.
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet that shares `payload` without copying it.
    pub fn new(opcode: u32, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    /// Packet without payload.
    pub fn empty(opcode: u32) -> Self {
        Self {
            opcode,
            payload: Bytes::new(),
        }
    }

    /// Copy `payload` into a new packet.
    pub fn from_slice(opcode: u32, payload: &[u8]) -> Self {
        Self {
            opcode,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Packet opcode.
    #[inline]
    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    /// Payload bytes, without the header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Bytes this packet occupies on the wire with the given header shape.
    #[inline]
    pub fn encoded_len(&self, shape: HeaderShape) -> usize {
        shape.size() + self.payload.len()
    }
}
