//! Packet header wire format.
//!
//! Two packed header shapes are used, one per direction:
//! ```text
//! server -> client (4 bytes)        client -> server (6 bytes)
//! ┌──────────┬──────────┐           ┌──────────┬──────────────────┐
//! │ Size     │ Opcode   │           │ Size     │ Opcode           │
//! │ u16 BE   │ u16 LE   │           │ u16 BE   │ u32 LE           │
//! └──────────┴──────────┘           └──────────┴──────────────────┘
//! ```
//!
//! `Size` counts the opcode field plus the payload, not itself.
//! Header bytes are passed through the connection's header crypt before they
//! hit the wire; payload bytes never are.

use crate::error::{Result, SocketError};

/// Size of a server -> client header.
pub const SERVER_HEADER_SIZE: usize = 4;

/// Size of a client -> server header.
pub const CLIENT_HEADER_SIZE: usize = 6;

/// Largest header of either shape.
pub const MAX_HEADER_SIZE: usize = CLIENT_HEADER_SIZE;

/// Which end of the connection this socket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepted from a game client; we are the server.
    Server,
    /// Connected out to another server; we act as the client.
    Client,
}

impl Role {
    /// Shape of the headers this socket writes.
    #[inline]
    pub fn outbound_shape(self) -> HeaderShape {
        match self {
            Role::Server => HeaderShape::ServerToClient,
            Role::Client => HeaderShape::ClientToServer,
        }
    }

    /// Shape of the headers this socket reads.
    #[inline]
    pub fn inbound_shape(self) -> HeaderShape {
        match self {
            Role::Server => HeaderShape::ClientToServer,
            Role::Client => HeaderShape::ServerToClient,
        }
    }
}

/// The two header layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderShape {
    /// `{ size: u16, opcode: u16 }`
    ServerToClient,
    /// `{ size: u16, opcode: u32 }`
    ClientToServer,
}

impl HeaderShape {
    /// Header length in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            HeaderShape::ServerToClient => SERVER_HEADER_SIZE,
            HeaderShape::ClientToServer => CLIENT_HEADER_SIZE,
        }
    }

    /// Width of the opcode field in bytes.
    #[inline]
    pub const fn opcode_width(self) -> usize {
        self.size() - 2
    }

    /// Largest opcode representable in this shape.
    #[inline]
    pub const fn max_opcode(self) -> u32 {
        match self {
            HeaderShape::ServerToClient => u16::MAX as u32,
            HeaderShape::ClientToServer => u32::MAX,
        }
    }

    /// Largest payload the 16-bit size field can describe.
    #[inline]
    pub const fn max_payload(self) -> usize {
        u16::MAX as usize - self.opcode_width()
    }
}

/// Encoded header bytes, sized for the larger shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBytes {
    buf: [u8; MAX_HEADER_SIZE],
    len: usize,
}

impl HeaderBytes {
    /// Encoded bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Encoded bytes, for in-place encryption.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Number of encoded header bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a header is never zero-length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Layout this header is encoded with.
    pub shape: HeaderShape,
    /// Wire size field: opcode width plus payload length.
    pub size: u16,
    /// Packet opcode.
    pub opcode: u32,
}

impl Header {
    /// Build the header for an outbound packet.
    ///
    /// Fails with [`SocketError::InvalidPacket`] if the opcode or payload
    /// cannot be represented in `shape`.
    pub fn for_packet(shape: HeaderShape, opcode: u32, payload_len: usize) -> Result<Self> {
        if opcode > shape.max_opcode() {
            return Err(SocketError::InvalidPacket(format!(
                "opcode {:#x} does not fit a {}-byte opcode field",
                opcode,
                shape.opcode_width()
            )));
        }
        if payload_len > shape.max_payload() {
            return Err(SocketError::InvalidPacket(format!(
                "payload of {} bytes exceeds header limit {}",
                payload_len,
                shape.max_payload()
            )));
        }
        Ok(Self {
            shape,
            size: (payload_len + shape.opcode_width()) as u16,
            opcode,
        })
    }

    /// Payload length described by the size field.
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(self.shape.opcode_width())
    }

    /// Encode to wire bytes (unencrypted).
    pub fn encode(&self) -> HeaderBytes {
        let mut bytes = HeaderBytes {
            buf: [0u8; MAX_HEADER_SIZE],
            len: self.shape.size(),
        };
        self.encode_into(bytes.as_mut_slice());
        bytes
    }

    /// Encode into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than the shape's header size.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= self.shape.size());
        buf[0..2].copy_from_slice(&self.size.to_be_bytes());
        match self.shape {
            HeaderShape::ServerToClient => {
                buf[2..4].copy_from_slice(&(self.opcode as u16).to_le_bytes());
            }
            HeaderShape::ClientToServer => {
                buf[2..6].copy_from_slice(&self.opcode.to_le_bytes());
            }
        }
    }

    /// Decode decrypted header bytes.
    ///
    /// Fails if the buffer is short or the size field cannot even cover the
    /// opcode field.
    pub fn decode(shape: HeaderShape, buf: &[u8]) -> Result<Self> {
        if buf.len() < shape.size() {
            return Err(SocketError::Protocol(format!(
                "header needs {} bytes, got {}",
                shape.size(),
                buf.len()
            )));
        }
        let size = u16::from_be_bytes([buf[0], buf[1]]);
        if (size as usize) < shape.opcode_width() {
            return Err(SocketError::Protocol(format!(
                "header size field {} smaller than opcode width",
                size
            )));
        }
        let opcode = match shape {
            HeaderShape::ServerToClient => u16::from_le_bytes([buf[2], buf[3]]) as u32,
            HeaderShape::ClientToServer => u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
        };
        Ok(Self {
            shape,
            size,
            opcode,
        })
    }
}
