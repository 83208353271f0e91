//! Overflow queue for packets that did not fit the output buffer.
//!
//! Packets are stored with their header already built but NOT yet
//! encrypted: the rolling header cipher must be advanced in wire order, which
//! only happens when a packet is moved into the output buffer.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{Result, SocketError};
use crate::protocol::{Header, HeaderShape, Packet};

/// A validated packet waiting for buffer space.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    /// Plaintext header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundPacket {
    /// Validate `packet` for the outbound header shape.
    pub fn new(shape: HeaderShape, packet: Packet) -> Result<Self> {
        let header = Header::for_packet(shape, packet.opcode, packet.payload.len())?;
        Ok(Self {
            header,
            payload: packet.payload,
        })
    }

    /// Total size of this packet on the wire (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        self.header.shape.size() + self.payload.len()
    }
}

/// Ordered backlog of outbound packets.
///
/// Unbounded unless a limit is configured.
#[derive(Debug, Default)]
pub struct OverflowQueue {
    packets: VecDeque<OutboundPacket>,
    limit: Option<usize>,
}

impl OverflowQueue {
    /// Empty queue; `limit` caps its length when set.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            packets: VecDeque::new(),
            limit,
        }
    }

    /// Append at the back.
    ///
    /// # Errors
    ///
    /// [`SocketError::QueueFull`] if a limit is configured and reached.
    pub fn push(&mut self, packet: OutboundPacket) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.packets.len() >= limit {
                return Err(SocketError::QueueFull { limit });
            }
        }
        self.packets.push_back(packet);
        Ok(())
    }

    /// Oldest queued packet.
    #[inline]
    pub fn front(&self) -> Option<&OutboundPacket> {
        self.packets.front()
    }

    /// Remove and return the oldest queued packet.
    #[inline]
    pub fn pop_front(&mut self) -> Option<OutboundPacket> {
        self.packets.pop_front()
    }

    /// Number of queued packets.
    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// True when nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Drop everything, returning how many packets were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.packets.len();
        self.packets.clear();
        n
    }
}
