//! Contracts between a socket and its collaborators.
//!
//! - [`Transport`]: the raw non-blocking byte stream, touched only by the
//!   dispatch thread
//! - [`Reactor`]: the dispatch substrate's per-connection registration
//! - [`Session`]: the application layer receiving reassembled packets
//!
//! The bundled tokio driver in [`crate::driver`] implements the first two;
//! tests use [`crate::transport::MemoryTransport`].

use std::io;

use crate::error::{Result, SocketError};
use crate::protocol::Packet;

/// Non-blocking byte stream.
///
/// Both calls are speculative: they move as many bytes as are immediately
/// possible and return `io::ErrorKind::WouldBlock` when none are.
pub trait Transport: Send + 'static {
    /// Receive into `buf`. `Ok(0)` means the peer closed its send side.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send from `buf`, returning how many bytes the transport accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Close the transport. Called once from `handle_close`.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A connection's registration with the dispatch substrate.
///
/// These are the only calls the socket makes into the substrate. None of
/// them is ever made while a socket lock is held.
pub trait Reactor: Send + Sync + 'static {
    /// Start delivering read-readiness (`handle_input`).
    fn register_input(&self) -> io::Result<()>;

    /// Start delivering write-readiness (`handle_output`).
    fn schedule_output(&self) -> io::Result<()>;

    /// Stop delivering write-readiness.
    fn cancel_output(&self) -> io::Result<()>;

    /// Ask the substrate to tear the connection down and invoke
    /// `handle_close`. Must not block; may be called from any thread.
    fn request_close(&self);

    /// Whether `schedule_output` leads to `handle_output` callbacks.
    ///
    /// When `false`, `update` keeps writing even while registered.
    fn delivers_write_readiness(&self) -> bool {
        true
    }
}

/// Reactor that ignores every registration.
///
/// For sockets driven by hand, where the caller decides when to call
/// `handle_input` and `update`. No write-readiness callback ever arrives,
/// so each `update` performs the write itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReactor;

impl Reactor for NullReactor {
    fn register_input(&self) -> io::Result<()> {
        Ok(())
    }

    fn schedule_output(&self) -> io::Result<()> {
        Ok(())
    }

    fn cancel_output(&self) -> io::Result<()> {
        Ok(())
    }

    fn request_close(&self) {}

    fn delivers_write_readiness(&self) -> bool {
        false
    }
}

/// Receiver of reassembled inbound packets.
///
/// The socket only holds a weak reference to its session.
pub trait Session: Send + Sync + 'static {
    /// Process one packet. Returning an error closes the connection.
    fn process_incoming(&self, packet: Packet) -> Result<()>;
}

/// Non-error outcome of a dispatch callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing more to do until the next readiness event.
    Complete,
    /// Call again: more data may be immediately available.
    MoreWork,
}

/// Why `handle_close` ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close_socket` was called.
    Requested,
    /// The peer shut down its send side.
    PeerClosed,
    /// Receive or send failed.
    TransportError,
    /// The peer sent something undecodable or oversized, or the session
    /// rejected a packet.
    ProtocolViolation,
    /// A buffer allocation failed.
    ResourceExhausted,
    /// `open` failed; the socket never became active.
    OpenFailed,
}

impl From<&SocketError> for CloseReason {
    fn from(err: &SocketError) -> Self {
        match err {
            SocketError::PeerClosed => CloseReason::PeerClosed,
            SocketError::Closed => CloseReason::Requested,
            SocketError::Io(_) => CloseReason::TransportError,
            SocketError::ResourceExhausted(_) => CloseReason::ResourceExhausted,
            SocketError::Protocol(_)
            | SocketError::InvalidPacket(_)
            | SocketError::QueueFull { .. }
            | SocketError::Config(_)
            | SocketError::Json(_) => CloseReason::ProtocolViolation,
        }
    }
}
