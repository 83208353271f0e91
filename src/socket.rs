//! Per-connection socket: lifecycle, input dispatch and the producer handle.
//!
//! A connection is split in two:
//!
//! - [`Socket`] is owned by the dispatch side. It holds the transport and the
//!   input reassembler and is the only thing that ever touches either.
//! - [`SocketHandle`] is a cheap, cloneable handle for producers and
//!   sessions. Cloning it adds a reference; dropping it removes one.
//!
//! Shared state lives behind an `Arc` reachable from both. It is freed only
//! when the last handle is gone AND [`Socket::handle_close`] has consumed
//! the dispatch side, so a callback can never run on a destroyed connection.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use world_socket::transport::MemoryTransport;
//! use world_socket::{NullReactor, Packet, PlainCrypt, SocketBuilder};
//!
//! let (transport, peer) = MemoryTransport::pair();
//! let mut socket = SocketBuilder::new("127.0.0.1:3724")
//!     .build(transport, PlainCrypt, Arc::new(NullReactor))
//!     .unwrap();
//! socket.open().unwrap();
//!
//! let handle = socket.handle().clone();
//! handle.send_packet(Packet::from_slice(0x1EE, b"hello")).unwrap();
//! socket.update().unwrap();
//! assert_eq!(peer.take_outbound().len(), 4 + 5);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::config::SocketConfig;
use crate::crypt::HeaderCrypt;
use crate::error::{Result, SocketError};
use crate::output::{OutputChannel, PendingOutput};
use crate::ping::PingGuard;
use crate::protocol::{InputReassembler, Packet, Role};
use crate::reactor::{CloseReason, Progress, Reactor, Session, Transport};
use crate::session::SessionSlot;

/// Size of the stack buffer used for one speculative receive.
pub const RECV_SCRATCH_SIZE: usize = 1024;

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SocketState {
    Created = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SocketState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SocketState::Created,
            1 => SocketState::Open,
            2 => SocketState::Closing,
            _ => SocketState::Closed,
        }
    }
}

/// State shared between the dispatch side and every handle.
struct SocketInner {
    state: AtomicU8,
    finished: AtomicBool,
    role: Role,
    remote_address: String,
    seed: u32,
    output: OutputChannel,
    session: SessionSlot,
    ping: PingGuard,
    reactor: Arc<dyn Reactor>,
}

impl SocketInner {
    fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_closed(&self) -> bool {
        self.state() >= SocketState::Closing
    }

    /// Move to `Closing` unless already there or beyond.
    ///
    /// Returns `true` for exactly one caller.
    fn mark_closing(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < SocketState::Closing as u8).then_some(SocketState::Closing as u8)
            })
            .is_ok()
    }

    fn dispatch(&self, packet: Packet) -> Result<()> {
        match self.session.get() {
            Some(session) => session.process_incoming(packet),
            None => {
                tracing::debug!(
                    remote = %self.remote_address,
                    opcode = packet.opcode,
                    len = packet.payload_len(),
                    "no session bound, dropping packet"
                );
                Ok(())
            }
        }
    }
}

/// Shared handle to a connection.
///
/// `Clone` adds a reference and `Drop` removes it. All methods are safe to
/// call from any thread.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<SocketInner>,
}

impl SocketHandle {
    /// Queue a packet for sending.
    ///
    /// The packet is only buffered here; it reaches the transport on the
    /// next `update` or write-readiness callback.
    ///
    /// # Errors
    ///
    /// - [`SocketError::Closed`] if the socket is closing
    /// - [`SocketError::InvalidPacket`] if the packet cannot be framed
    /// - [`SocketError::QueueFull`] if the overflow queue is capped and full
    pub fn send_packet(&self, packet: Packet) -> Result<()> {
        if self.inner.is_closed() {
            return Err(SocketError::Closed);
        }
        tracing::trace!(
            remote = %self.inner.remote_address,
            opcode = packet.opcode,
            len = packet.payload_len(),
            "send packet"
        );
        self.inner.output.send(packet)
    }

    /// Request teardown. Idempotent and non-blocking.
    ///
    /// Refuses further sends, drops any write-readiness registration,
    /// releases the session and asks the substrate to call `handle_close`.
    pub fn close_socket(&self) {
        if !self.inner.mark_closing() {
            return;
        }
        tracing::debug!(remote = %self.inner.remote_address, "close requested");
        self.inner.output.shutdown();
        self.inner.session.clear();
        self.inner.reactor.request_close();
    }

    /// Peer address, as formatted when the socket was built.
    pub fn remote_address(&self) -> &str {
        &self.inner.remote_address
    }

    /// True once a close has started.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// True once `handle_close` has run; no further callbacks will arrive.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.inner.state()
    }

    /// Bind the session that receives inbound packets.
    ///
    /// Only a weak reference is kept; the socket never extends the
    /// session's lifetime.
    pub fn set_session<S: Session>(&self, session: &Arc<S>) {
        let weak: Weak<S> = Arc::downgrade(session);
        let weak: Weak<dyn Session> = weak;
        if self.inner.session.set(weak) {
            tracing::debug!(remote = %self.inner.remote_address, "session re-pointed");
        }
    }

    /// Unbind the session; later inbound packets are dropped.
    pub fn clear_session(&self) {
        self.inner.session.clear();
    }

    /// Whether a session is bound and still alive.
    pub fn has_session(&self) -> bool {
        self.inner.session.is_bound()
    }

    /// Which end of the connection this socket is.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// True for the accepting (server) side.
    pub fn is_server_side(&self) -> bool {
        self.inner.role == Role::Server
    }

    /// Random value generated for this connection's login challenge.
    pub fn seed(&self) -> u32 {
        self.inner.seed
    }

    /// Record a ping from the peer.
    ///
    /// # Errors
    ///
    /// [`SocketError::Protocol`] if the peer is flooding pings. The caller
    /// should close the socket.
    pub fn record_ping(&self, now: Instant) -> Result<()> {
        self.inner.ping.record(now).inspect_err(|e| {
            tracing::warn!(remote = %self.inner.remote_address, error = %e, "ping flood");
        })
    }

    /// Output not yet handed to the transport.
    pub fn pending_output(&self) -> PendingOutput {
        self.inner.output.pending()
    }

    /// Whether write-readiness is currently requested from the reactor.
    pub fn is_write_registered(&self) -> bool {
        self.inner.output.is_write_registered()
    }

    /// Live references to the shared state, including the dispatch side's.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("remote", &self.inner.remote_address)
            .field("role", &self.inner.role)
            .field("state", &self.inner.state())
            .finish()
    }
}

/// Dispatch-side half of a connection.
///
/// Every method here must be called from the single thread (or task) that
/// owns the connection's I/O.
pub struct Socket<T: Transport> {
    transport: T,
    input: InputReassembler,
    handle: SocketHandle,
}

impl<T: Transport> Socket<T> {
    /// Handle for producers. Clone it to add a reference.
    pub fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    /// Allocate the output buffer and register for read-readiness.
    ///
    /// On error the connection is unusable; pass it to
    /// [`Socket::handle_close`] with [`CloseReason::OpenFailed`].
    pub fn open(&mut self) -> Result<()> {
        let inner = &self.handle.inner;
        inner.output.allocate()?;
        inner.reactor.register_input()?;
        inner
            .state
            .compare_exchange(
                SocketState::Created as u8,
                SocketState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SocketError::Closed)?;
        tracing::debug!(remote = %inner.remote_address, role = ?inner.role, "socket opened");
        Ok(())
    }

    /// Read-readiness callback.
    ///
    /// Performs one speculative receive and delivers every packet it
    /// completes. Returns [`Progress::MoreWork`] when the scratch buffer was
    /// filled and more data may be waiting.
    pub fn handle_input(&mut self) -> Result<Progress> {
        let result = self.receive_and_dispatch();
        self.close_on_error(result)
    }

    /// Write-readiness callback.
    pub fn handle_output(&mut self) -> Result<Progress> {
        let result = self
            .handle
            .inner
            .output
            .handle_output(&mut self.transport);
        self.close_on_error(result)
    }

    /// Periodic flush of buffered output.
    pub fn update(&mut self) -> Result<Progress> {
        let result = self.handle.inner.output.update(&mut self.transport);
        self.close_on_error(result)
    }

    /// Final callback. Consumes the dispatch side.
    ///
    /// Buffered output is discarded, the transport is shut down and the
    /// socket is marked finished. The shared state survives until the last
    /// handle drops.
    pub fn handle_close(mut self, reason: CloseReason) {
        self.teardown(reason);
    }

    /// Drop a connection that failed before `open`.
    pub fn abort(self) {
        self.handle_close(CloseReason::OpenFailed);
    }

    fn receive_and_dispatch(&mut self) -> Result<Progress> {
        if self.handle.is_closed() {
            return Err(SocketError::Closed);
        }

        let mut scratch = [0u8; RECV_SCRATCH_SIZE];
        let n = match self.transport.recv(&mut scratch) {
            Ok(0) => return Err(SocketError::PeerClosed),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return self.handle.inner.output.update(&mut self.transport);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                return Ok(Progress::MoreWork);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::trace!(remote = %self.handle.inner.remote_address, len = n, "received");

        let inner = &self.handle.inner;
        self.input.feed(&scratch[..n], |packet| inner.dispatch(packet))?;

        if n == RECV_SCRATCH_SIZE {
            Ok(Progress::MoreWork)
        } else {
            self.handle.inner.output.update(&mut self.transport)
        }
    }

    fn close_on_error(&self, result: Result<Progress>) -> Result<Progress> {
        if let Err(e) = &result {
            let remote = &self.handle.inner.remote_address;
            if e.is_graceful() {
                tracing::debug!(remote = %remote, reason = %e, "closing socket");
            } else if e.is_fatal() {
                tracing::warn!(remote = %remote, error = %e, "closing socket");
            } else {
                // A session chose to close over a recoverable error.
                tracing::info!(remote = %remote, error = %e, "closing socket");
            }
            self.handle.close_socket();
        }
        result
    }

    fn teardown(&mut self, reason: CloseReason) {
        let inner = &self.handle.inner;
        if inner.finished.load(Ordering::Acquire) {
            return;
        }
        inner.mark_closing();
        inner.output.shutdown();
        inner.session.clear();

        let discarded = inner.output.discard();
        self.input.reset();
        if let Err(e) = self.transport.shutdown() {
            tracing::debug!(remote = %inner.remote_address, error = %e, "transport shutdown failed");
        }

        inner.state.store(SocketState::Closed as u8, Ordering::Release);
        inner.finished.store(true, Ordering::Release);
        tracing::debug!(
            remote = %inner.remote_address,
            ?reason,
            discarded_bytes = discarded.buffered_bytes,
            discarded_packets = discarded.queued_packets,
            "socket closed"
        );
    }
}

impl<T: Transport> Drop for Socket<T> {
    fn drop(&mut self) {
        // Dropped without `handle_close`, e.g. a driver task was cancelled.
        self.teardown(CloseReason::Requested);
    }
}

impl<T: Transport> fmt::Debug for Socket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("handle", &self.handle)
            .field("input_idle", &self.input.is_idle())
            .finish()
    }
}

/// Builder for a [`Socket`].
#[derive(Debug, Clone)]
pub struct SocketBuilder {
    remote_address: String,
    role: Role,
    config: SocketConfig,
}

impl SocketBuilder {
    /// Server-side socket for a peer at `remote_address`.
    pub fn new(remote_address: impl Into<String>) -> Self {
        Self {
            remote_address: remote_address.into(),
            role: Role::Server,
            config: SocketConfig::default(),
        }
    }

    /// Set which end of the connection this socket is. Defaults to server.
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Act as the client end: send client headers, read server headers.
    pub fn client_side(self) -> Self {
        self.role(Role::Client)
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and assemble the socket.
    pub fn build<T, C>(self, transport: T, crypt: C, reactor: Arc<dyn Reactor>) -> Result<Socket<T>>
    where
        T: Transport,
        C: HeaderCrypt,
    {
        self.config.validate()?;
        let (encrypt, decrypt) = crypt.split();

        let inner = SocketInner {
            state: AtomicU8::new(SocketState::Created as u8),
            finished: AtomicBool::new(false),
            role: self.role,
            seed: rand::random(),
            output: OutputChannel::new(
                self.role.outbound_shape(),
                Box::new(encrypt),
                &self.config,
                reactor.clone(),
            ),
            session: SessionSlot::default(),
            ping: PingGuard::new(
                Instant::now(),
                self.config.min_ping_interval(),
                self.config.max_overspeed_pings,
            ),
            reactor,
            remote_address: self.remote_address,
        };

        Ok(Socket {
            transport,
            input: InputReassembler::new(self.role, Box::new(decrypt), &self.config),
            handle: SocketHandle {
                inner: Arc::new(inner),
            },
        })
    }
}
