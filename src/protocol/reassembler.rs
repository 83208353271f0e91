//! Input reassembler for fragmented packet streams.
//!
//! Implements a two-phase state machine:
//! - header phase: accumulate exactly one inbound header, decrypt and decode it
//! - payload phase: accumulate the declared number of payload bytes
//!
//! A single chunk of input may finish a header, start a payload, finish it
//! and start the next header, all in one call to [`InputReassembler::feed`].
//! The reassembler is owned by the dispatch thread and is never shared.
//!
//! # Example
//!
//! ```
//! use world_socket::crypt::PlainCrypt;
//! use world_socket::protocol::{InputReassembler, Role};
//! use world_socket::SocketConfig;
//!
//! let mut input = InputReassembler::new(Role::Client, Box::new(PlainCrypt), &SocketConfig::default());
//! let mut packets = Vec::new();
//!
//! // server -> client header: size = 2 + 2, opcode 0x1DD, then "hi"
//! input.feed(&[0, 4, 0xDD, 0x01, b'h'], |p| { packets.push(p); Ok(()) }).unwrap();
//! assert!(packets.is_empty());
//! input.feed(&[b'i'], |p| { packets.push(p); Ok(()) }).unwrap();
//! assert_eq!(packets[0].payload(), b"hi");
//! ```

use bytes::Bytes;

use super::header::{Header, HeaderShape, Role, MAX_HEADER_SIZE};
use super::packet::Packet;
use crate::config::SocketConfig;
use crate::crypt::HeaderDecrypt;
use crate::error::{Result, SocketError};

/// Packet whose header has been decoded but whose payload is incomplete.
#[derive(Debug)]
struct PendingPacket {
    opcode: u32,
    expected: usize,
    payload: Vec<u8>,
}

impl PendingPacket {
    #[inline]
    fn remaining(&self) -> usize {
        self.expected - self.payload.len()
    }

    fn into_packet(self) -> Packet {
        Packet::new(self.opcode, Bytes::from(self.payload))
    }
}

/// Reconstructs packets from an arbitrarily chunked inbound byte stream.
pub struct InputReassembler {
    shape: HeaderShape,
    decrypt: Box<dyn HeaderDecrypt>,
    max_payload: usize,
    /// Only enforced on server-side sockets.
    max_opcode: Option<u32>,
    header: [u8; MAX_HEADER_SIZE],
    header_filled: usize,
    pending: Option<PendingPacket>,
}

impl InputReassembler {
    /// Create a reassembler for the inbound direction of `role`.
    pub fn new(role: Role, decrypt: Box<dyn HeaderDecrypt>, config: &SocketConfig) -> Self {
        Self {
            shape: role.inbound_shape(),
            decrypt,
            max_payload: config.max_payload_size,
            max_opcode: match role {
                Role::Server => Some(config.max_inbound_opcode),
                Role::Client => None,
            },
            header: [0u8; MAX_HEADER_SIZE],
            header_filled: 0,
            pending: None,
        }
    }

    /// Consume `data`, handing every completed packet to `deliver`.
    ///
    /// Returns the number of packets delivered. Ownership of each packet
    /// moves into `deliver`; an error from it stops processing and is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// [`SocketError::Protocol`] for an undecodable header, a declared payload
    /// above the configured maximum or an out-of-range opcode;
    /// [`SocketError::ResourceExhausted`] if the payload buffer cannot be
    /// allocated.
    pub fn feed<F>(&mut self, mut data: &[u8], mut deliver: F) -> Result<usize>
    where
        F: FnMut(Packet) -> Result<()>,
    {
        let mut delivered = 0;

        while !data.is_empty() {
            match self.pending.as_mut() {
                None => {
                    let size = self.shape.size();
                    let take = (size - self.header_filled).min(data.len());
                    self.header[self.header_filled..self.header_filled + take]
                        .copy_from_slice(&data[..take]);
                    self.header_filled += take;
                    data = &data[take..];

                    if self.header_filled < size {
                        break;
                    }

                    let pending = self.begin_packet()?;
                    if pending.expected == 0 {
                        deliver(pending.into_packet())?;
                        delivered += 1;
                    } else {
                        self.pending = Some(pending);
                    }
                }
                Some(pending) => {
                    let take = pending.remaining().min(data.len());
                    pending.payload.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if pending.remaining() == 0 {
                        if let Some(done) = self.pending.take() {
                            deliver(done.into_packet())?;
                            delivered += 1;
                        }
                    }
                }
            }
        }

        Ok(delivered)
    }

    /// Decrypt and validate the completed header, then allocate its payload.
    fn begin_packet(&mut self) -> Result<PendingPacket> {
        let size = self.shape.size();
        self.header_filled = 0;

        let raw = &mut self.header[..size];
        self.decrypt.decrypt_header(raw)?;
        let header = Header::decode(self.shape, raw)?;

        let expected = header.payload_len();
        if expected > self.max_payload {
            return Err(SocketError::Protocol(format!(
                "declared payload {} exceeds maximum {}",
                expected, self.max_payload
            )));
        }
        if let Some(max_opcode) = self.max_opcode {
            if header.opcode > max_opcode {
                return Err(SocketError::Protocol(format!(
                    "opcode {:#x} exceeds maximum {:#x}",
                    header.opcode, max_opcode
                )));
            }
        }

        let mut payload = Vec::new();
        payload.try_reserve_exact(expected).map_err(|e| {
            SocketError::ResourceExhausted(format!("payload buffer of {} bytes: {}", expected, e))
        })?;

        tracing::trace!(opcode = header.opcode, len = expected, "header decoded");

        Ok(PendingPacket {
            opcode: header.opcode,
            expected,
            payload,
        })
    }

    /// True between packets (no partial header, no partial payload).
    pub fn is_idle(&self) -> bool {
        self.header_filled == 0 && self.pending.is_none()
    }

    /// Bytes of the current partial header.
    pub fn buffered_header_len(&self) -> usize {
        self.header_filled
    }

    /// Drop any partial packet.
    pub fn reset(&mut self) {
        self.header_filled = 0;
        self.pending = None;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.pending {
            Some(_) => "WaitingForPayload",
            None => "WaitingForHeader",
        }
    }
}
