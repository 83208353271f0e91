//! Output coalescer: batches many small packets into few large writes.
//!
//! Producers on any thread append packets to a fixed-size output buffer, or
//! to the overflow queue once the buffer is full. Nothing touches the
//! transport on the producer side: the dispatch thread writes the buffer on
//! its periodic `update` tick or on write-readiness, so many sends share one
//! syscall.
//!
//! ```text
//! Producer 1 ─┐                    ┌──────────────┐
//! Producer 2 ─┼─► output lock ──►  │ OutBuffer    │ ──► update / handle_output ──► Transport
//! Producer N ─┘        │           └──────────────┘
//!                      └─► OverflowQueue (FIFO, flushed into the buffer as space frees)
//! ```
//!
//! All ordering decisions are taken under the single output lock, so bytes
//! reach the wire in the order the `send` calls completed.

use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::buffer::OutBuffer;
use super::queue::{OutboundPacket, OverflowQueue};
use crate::config::SocketConfig;
use crate::crypt::HeaderEncrypt;
use crate::error::{Result, SocketError};
use crate::protocol::{HeaderShape, Packet};
use crate::reactor::{Progress, Reactor, Transport};

/// Snapshot of data not yet handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingOutput {
    /// Encoded bytes sitting in the output buffer.
    pub buffered_bytes: usize,
    /// Packets waiting in the overflow queue.
    pub queued_packets: usize,
}

/// Everything guarded by the output lock.
struct OutputState {
    buffer: OutBuffer,
    queue: OverflowQueue,
    encrypt: Box<dyn HeaderEncrypt>,
    write_registered: bool,
    closed: bool,
}

impl OutputState {
    /// Place one packet in the buffer if it fits, encrypting its header.
    ///
    /// The header is encrypted only once the packet is known to fit, so the
    /// cipher advances exactly once per packet in wire order.
    fn try_append(&mut self, packet: &OutboundPacket) -> bool {
        if packet.size() > self.buffer.space() {
            return false;
        }
        let mut header = packet.header.encode();
        self.encrypt.encrypt_header(header.as_mut_slice());
        self.buffer.try_append(header.as_slice(), &packet.payload)
    }

    /// Move queued packets into the buffer, in order, while they fit.
    ///
    /// Returns `true` if anything was moved.
    fn flush_queue(&mut self) -> bool {
        let mut moved = false;
        while self
            .queue
            .front()
            .is_some_and(|next| next.size() <= self.buffer.space())
        {
            if let Some(packet) = self.queue.pop_front() {
                moved |= self.try_append(&packet);
            }
        }
        moved
    }
}

/// Output buffer, overflow queue and write-readiness bookkeeping behind one
/// lock.
///
/// No method hands out the guard or calls into anything that takes another
/// socket lock while holding it.
pub(crate) struct OutputChannel {
    state: Mutex<OutputState>,
    shape: HeaderShape,
    capacity: usize,
    reactor: Arc<dyn Reactor>,
}

impl OutputChannel {
    pub(crate) fn new(
        shape: HeaderShape,
        encrypt: Box<dyn HeaderEncrypt>,
        config: &SocketConfig,
        reactor: Arc<dyn Reactor>,
    ) -> Self {
        Self {
            state: Mutex::new(OutputState {
                buffer: OutBuffer::new(config.out_buffer_size),
                queue: OverflowQueue::new(config.max_queued_packets),
                encrypt,
                write_registered: false,
                closed: false,
            }),
            shape,
            capacity: config.out_buffer_size,
            reactor,
        }
    }

    /// Allocate the output buffer.
    pub(crate) fn allocate(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.buffer.allocate()?;
        // Anything sent before allocation was queued.
        state.flush_queue();
        Ok(())
    }

    /// Buffer or queue a packet. Safe from any thread.
    ///
    /// # Errors
    ///
    /// - [`SocketError::Closed`] once the channel is shut down
    /// - [`SocketError::InvalidPacket`] if the packet can never be framed
    /// - [`SocketError::QueueFull`] if the optional queue cap is reached
    pub(crate) fn send(&self, packet: Packet) -> Result<()> {
        let outbound = OutboundPacket::new(self.shape, packet)?;
        if outbound.size() > self.capacity {
            return Err(SocketError::InvalidPacket(format!(
                "encoded size {} exceeds output buffer capacity {}",
                outbound.size(),
                self.capacity
            )));
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }

        // Never jump ahead of already-queued packets.
        if !state.queue.is_empty() || !state.try_append(&outbound) {
            tracing::trace!(
                opcode = outbound.header.opcode,
                queued = state.queue.len() + 1,
                "output buffer full, queueing packet"
            );
            state.queue.push(outbound)?;
        }
        Ok(())
    }

    /// Periodic flush, called by the dispatch thread.
    pub(crate) fn update<T: Transport>(&self, transport: &mut T) -> Result<Progress> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SocketError::Closed);
            }
            state.flush_queue();
            if state.buffer.is_empty() {
                return Ok(Progress::Complete);
            }
            // While registered, the substrate's write-readiness callback
            // drives the writes.
            if state.write_registered && self.reactor.delivers_write_readiness() {
                return Ok(Progress::Complete);
            }
        }

        while self.handle_output(transport)? == Progress::MoreWork {}
        Ok(Progress::Complete)
    }

    /// One speculative write of the buffered bytes.
    pub(crate) fn handle_output<T: Transport>(&self, transport: &mut T) -> Result<Progress> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SocketError::Closed);
        }

        if state.buffer.is_empty() && !state.flush_queue() {
            self.cancel_wakeup_output(state)?;
            return Ok(Progress::Complete);
        }

        let pending = state.buffer.len();
        match transport.send(state.buffer.as_slice()) {
            Ok(0) => Err(SocketError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "transport accepted 0 bytes",
            ))),
            Ok(n) if n < pending => {
                tracing::trace!(sent = n, pending, "partial write");
                state.buffer.consume(n);
                self.schedule_wakeup_output(state)?;
                Ok(Progress::Complete)
            }
            Ok(n) => {
                tracing::trace!(sent = n, "output buffer drained");
                state.buffer.clear();
                if state.flush_queue() {
                    self.schedule_wakeup_output(state)?;
                } else {
                    self.cancel_wakeup_output(state)?;
                }
                Ok(Progress::Complete)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.schedule_wakeup_output(state)?;
                Ok(Progress::Complete)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Progress::MoreWork),
            Err(e) => Err(e.into()),
        }
    }

    /// Register for write-readiness unless already registered.
    ///
    /// Consumes the guard: the lock is released before calling the reactor.
    fn schedule_wakeup_output(&self, mut state: MutexGuard<'_, OutputState>) -> Result<()> {
        if state.write_registered {
            return Ok(());
        }
        state.write_registered = true;
        drop(state);
        self.reactor.schedule_output()?;
        Ok(())
    }

    /// Unregister write-readiness if registered.
    ///
    /// Consumes the guard: the lock is released before calling the reactor.
    fn cancel_wakeup_output(&self, mut state: MutexGuard<'_, OutputState>) -> Result<()> {
        if !state.write_registered {
            return Ok(());
        }
        state.write_registered = false;
        drop(state);
        self.reactor.cancel_output()?;
        Ok(())
    }

    /// Refuse further sends and drop any write registration.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Err(e) = self.cancel_wakeup_output(state) {
            tracing::debug!(error = %e, "cancel output registration failed during close");
        }
    }

    /// Drop buffered and queued data, returning what was discarded.
    pub(crate) fn discard(&self) -> PendingOutput {
        let mut state = self.state.lock();
        let discarded = PendingOutput {
            buffered_bytes: state.buffer.len(),
            queued_packets: state.queue.clear(),
        };
        state.buffer.clear();
        discarded
    }

    pub(crate) fn pending(&self) -> PendingOutput {
        let state = self.state.lock();
        PendingOutput {
            buffered_bytes: state.buffer.len(),
            queued_packets: state.queue.len(),
        }
    }

    pub(crate) fn is_write_registered(&self) -> bool {
        self.state.lock().write_registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::tests::RollingXor;
    use crate::crypt::{HeaderCrypt, HeaderDecrypt, PlainCrypt};
    use crate::protocol::{Header, SERVER_HEADER_SIZE};
    use crate::reactor::tests::RecordingReactor;
    use crate::reactor::NullReactor;
    use crate::transport::{MemoryPeer, MemoryTransport};

    fn channel(capacity: usize) -> (OutputChannel, Arc<RecordingReactor>) {
        let reactor = Arc::new(RecordingReactor::default());
        let config = SocketConfig::default().with_out_buffer_size(capacity);
        let channel = OutputChannel::new(
            HeaderShape::ServerToClient,
            Box::new(PlainCrypt),
            &config,
            reactor.clone(),
        );
        channel.allocate().unwrap();
        (channel, reactor)
    }

    /// A 100-byte encoded packet (4-byte header + 96-byte payload).
    fn hundred_byte_packet(index: u8) -> Packet {
        Packet::from_slice(index as u32, &[index; 96])
    }

    /// Split a server -> client byte stream back into (opcode, payload).
    fn parse_wire(mut wire: &[u8]) -> Vec<(u32, Vec<u8>)> {
        let mut packets = Vec::new();
        while !wire.is_empty() {
            let header = Header::decode(HeaderShape::ServerToClient, wire).unwrap();
            let end = SERVER_HEADER_SIZE + header.payload_len();
            packets.push((header.opcode, wire[SERVER_HEADER_SIZE..end].to_vec()));
            wire = &wire[end..];
        }
        packets
    }

    fn pair() -> (MemoryTransport, MemoryPeer) {
        MemoryTransport::pair()
    }

    #[test]
    fn test_send_only_buffers() {
        let (channel, reactor) = channel(1024);
        let (_transport, peer) = pair();

        channel.send(Packet::from_slice(1, b"hi")).unwrap();

        assert_eq!(channel.pending().buffered_bytes, 6);
        assert_eq!(peer.send_calls(), 0);
        assert_eq!(RecordingReactor::count(&reactor.schedules), 0);
    }

    #[test]
    fn test_update_writes_everything_in_one_send() {
        let (channel, _reactor) = channel(1024);
        let (mut transport, peer) = pair();

        for i in 0..5 {
            channel.send(Packet::from_slice(i, b"abc")).unwrap();
        }
        channel.update(&mut transport).unwrap();

        assert_eq!(peer.send_calls(), 1);
        let packets = parse_wire(&peer.take_outbound());
        let opcodes: Vec<u32> = packets.iter().map(|p| p.0).collect();
        assert_eq!(opcodes, vec![0, 1, 2, 3, 4]);
        assert_eq!(channel.pending(), PendingOutput::default());
    }

    #[test]
    fn test_buffer_queue_handoff() {
        let (channel, reactor) = channel(1024);
        let (mut transport, peer) = pair();

        for i in 0..20 {
            channel.send(hundred_byte_packet(i)).unwrap();
        }
        assert_eq!(
            channel.pending(),
            PendingOutput {
                buffered_bytes: 1000,
                queued_packets: 10
            }
        );

        // First flush writes exactly the ten packets that fit.
        channel.update(&mut transport).unwrap();
        let first = parse_wire(&peer.take_outbound());
        assert_eq!(first.len(), 10);
        assert!(first.iter().enumerate().all(|(i, p)| p.0 == i as u32));

        // The remainder moved into the buffer; write-readiness is requested.
        assert_eq!(channel.pending().queued_packets, 0);
        assert!(reactor.is_write_registered());

        channel.handle_output(&mut transport).unwrap();
        let second = parse_wire(&peer.take_outbound());
        let opcodes: Vec<u32> = second.iter().map(|p| p.0).collect();
        assert_eq!(opcodes, (10..20).collect::<Vec<u32>>());
        assert!(!reactor.is_write_registered());
    }

    #[test]
    fn test_new_packets_never_jump_the_queue() {
        let (channel, _reactor) = channel(250);
        let (mut transport, peer) = pair();

        channel.send(hundred_byte_packet(1)).unwrap();
        channel.send(hundred_byte_packet(2)).unwrap();
        channel.send(hundred_byte_packet(3)).unwrap(); // queued
        channel.send(Packet::from_slice(4, b"x")).unwrap(); // would fit, must queue

        assert_eq!(channel.pending().queued_packets, 2);

        channel.update(&mut transport).unwrap();
        channel.handle_output(&mut transport).unwrap();

        let opcodes: Vec<u32> = parse_wire(&peer.take_outbound()).iter().map(|p| p.0).collect();
        assert_eq!(opcodes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_partial_write_keeps_tail_and_registers() {
        let (channel, reactor) = channel(1024);
        let (mut transport, peer) = pair();
        peer.set_send_budget(Some(7));

        channel.send(Packet::from_slice(1, b"0123456789")).unwrap();
        channel.update(&mut transport).unwrap();

        assert_eq!(peer.outbound_len(), 7);
        assert_eq!(channel.pending().buffered_bytes, 7);
        assert!(reactor.is_write_registered());

        // Registered: update leaves the writing to the readiness callback.
        channel.update(&mut transport).unwrap();
        assert_eq!(peer.send_calls(), 1);

        peer.set_send_budget(None);
        channel.handle_output(&mut transport).unwrap();

        let packets = parse_wire(&peer.take_outbound());
        assert_eq!(packets, vec![(1, b"0123456789".to_vec())]);
        assert!(!reactor.is_write_registered());
        assert_eq!(RecordingReactor::count(&reactor.schedules), 1);
        assert_eq!(RecordingReactor::count(&reactor.cancels), 1);
    }

    #[test]
    fn test_would_block_registers_once() {
        let (channel, reactor) = channel(1024);
        let (mut transport, peer) = pair();
        peer.block_writes(true);

        channel.send(Packet::empty(1)).unwrap();
        channel.update(&mut transport).unwrap();
        channel.handle_output(&mut transport).unwrap();
        channel.handle_output(&mut transport).unwrap();

        assert_eq!(RecordingReactor::count(&reactor.schedules), 1);
        assert_eq!(channel.pending().buffered_bytes, 4);
    }

    #[test]
    fn test_handle_output_on_empty_buffer_unregisters() {
        let (channel, reactor) = channel(1024);
        let (mut transport, peer) = pair();

        channel.handle_output(&mut transport).unwrap();
        assert_eq!(peer.send_calls(), 0);
        assert_eq!(RecordingReactor::count(&reactor.cancels), 0);
    }

    #[test]
    fn test_zero_byte_send_is_transport_error() {
        let (channel, _reactor) = channel(1024);
        let (mut transport, peer) = pair();
        peer.set_send_budget(Some(0));

        channel.send(Packet::empty(1)).unwrap();
        let result = channel.update(&mut transport);
        assert!(matches!(result, Err(SocketError::Io(_))));
    }

    #[test]
    fn test_oversized_packet_is_invalid_not_queued() {
        let (channel, _reactor) = channel(64);
        let result = channel.send(Packet::from_slice(1, &[0; 61]));
        assert!(matches!(result, Err(SocketError::InvalidPacket(_))));
        assert_eq!(channel.pending(), PendingOutput::default());

        // 4 + 60 fits exactly.
        channel.send(Packet::from_slice(1, &[0; 60])).unwrap();
    }

    #[test]
    fn test_queue_cap() {
        let reactor = Arc::new(RecordingReactor::default());
        let config = SocketConfig::default()
            .with_out_buffer_size(8)
            .with_max_queued_packets(1);
        let channel = OutputChannel::new(
            HeaderShape::ServerToClient,
            Box::new(PlainCrypt),
            &config,
            reactor,
        );
        channel.allocate().unwrap();

        channel.send(Packet::from_slice(1, b"1234")).unwrap();
        channel.send(Packet::from_slice(2, b"1234")).unwrap();
        assert!(matches!(
            channel.send(Packet::from_slice(3, b"1234")),
            Err(SocketError::QueueFull { limit: 1 })
        ));
    }

    #[test]
    fn test_shutdown_rejects_sends_and_cancels_registration() {
        let (channel, reactor) = channel(1024);
        let (mut transport, peer) = pair();
        peer.block_writes(true);

        channel.send(Packet::empty(1)).unwrap();
        channel.update(&mut transport).unwrap();
        assert!(channel.is_write_registered());

        channel.shutdown();
        channel.shutdown();

        assert!(!channel.is_write_registered());
        assert_eq!(RecordingReactor::count(&reactor.cancels), 1);
        assert!(matches!(channel.send(Packet::empty(2)), Err(SocketError::Closed)));
        assert!(matches!(channel.update(&mut transport), Err(SocketError::Closed)));

        let discarded = channel.discard();
        assert_eq!(discarded.buffered_bytes, 4);
    }

    #[test]
    fn test_headers_encrypted_in_wire_order() {
        let (encrypt, mut decrypt) = RollingXor::new(&[0x13, 0x37, 0xBE, 0xEF]).split();
        let reactor = Arc::new(RecordingReactor::default());
        let config = SocketConfig::default().with_out_buffer_size(20);
        let channel = OutputChannel::new(
            HeaderShape::ServerToClient,
            Box::new(encrypt),
            &config,
            reactor,
        );
        channel.allocate().unwrap();
        let (mut transport, peer) = pair();

        // Second and third packets are queued before encryption.
        channel.send(Packet::from_slice(1, &[1; 12])).unwrap();
        channel.send(Packet::from_slice(2, &[2; 12])).unwrap();
        channel.send(Packet::from_slice(3, &[3; 2])).unwrap();

        channel.update(&mut transport).unwrap();
        channel.handle_output(&mut transport).unwrap();
        channel.handle_output(&mut transport).unwrap();

        let mut wire = peer.take_outbound();
        let mut offset = 0;
        let mut opcodes = Vec::new();
        while offset < wire.len() {
            let header_bytes = &mut wire[offset..offset + SERVER_HEADER_SIZE];
            decrypt.decrypt_header(header_bytes).unwrap();
            let header = Header::decode(HeaderShape::ServerToClient, header_bytes).unwrap();
            opcodes.push(header.opcode);
            offset += SERVER_HEADER_SIZE + header.payload_len();
        }
        assert_eq!(opcodes, vec![1, 2, 3]);
    }

    #[test]
    fn test_update_keeps_writing_without_readiness_callbacks() {
        let config = SocketConfig::default().with_out_buffer_size(1024);
        let channel = OutputChannel::new(
            HeaderShape::ServerToClient,
            Box::new(PlainCrypt),
            &config,
            Arc::new(NullReactor),
        );
        channel.allocate().unwrap();
        let (mut transport, peer) = pair();

        for i in 0..20 {
            channel.send(hundred_byte_packet(i)).unwrap();
        }

        channel.update(&mut transport).unwrap();
        assert_eq!(peer.outbound_len(), 1000);
        assert!(channel.is_write_registered());

        channel.update(&mut transport).unwrap();
        let opcodes: Vec<u32> = parse_wire(&peer.take_outbound()).iter().map(|p| p.0).collect();
        assert_eq!(opcodes, (0..20).collect::<Vec<u32>>());
        assert!(!channel.is_write_registered());
        assert_eq!(channel.pending(), PendingOutput::default());
    }

    #[test]
    fn test_sends_before_allocation_are_queued() {
        let reactor = Arc::new(RecordingReactor::default());
        let config = SocketConfig::default().with_out_buffer_size(64);
        let channel = OutputChannel::new(
            HeaderShape::ServerToClient,
            Box::new(PlainCrypt),
            &config,
            reactor,
        );

        channel.send(Packet::from_slice(1, b"early")).unwrap();
        assert_eq!(channel.pending().queued_packets, 1);

        channel.allocate().unwrap();
        assert_eq!(
            channel.pending(),
            PendingOutput {
                buffered_bytes: 9,
                queued_packets: 0
            }
        );
    }
}
