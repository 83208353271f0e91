//! In-process transport with a controllable peer.
//!
//! Each chunk pushed by the peer is delivered by at most one `recv` call,
//! which makes fragmentation explicit. The peer can also cap how many bytes
//! a single `send` accepts, block writes entirely, or fail the next receive.
//!
//! # Example
//!
//! ```
//! use world_socket::reactor::Transport;
//! use world_socket::transport::MemoryTransport;
//!
//! let (mut transport, peer) = MemoryTransport::pair();
//! peer.push_inbound(b"abc");
//!
//! let mut buf = [0u8; 8];
//! assert_eq!(transport.recv(&mut buf).unwrap(), 3);
//!
//! peer.set_send_budget(Some(2));
//! assert_eq!(transport.send(b"xyz").unwrap(), 2);
//! assert_eq!(peer.take_outbound(), b"xy");
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactor::Transport;

#[derive(Debug, Default)]
struct MemoryState {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<u8>,
    send_budget: Option<usize>,
    writes_blocked: bool,
    peer_closed: bool,
    recv_error: Option<io::ErrorKind>,
    send_calls: usize,
    shutdown: bool,
}

/// The socket side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

/// The remote side of an in-memory connection.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        (
            MemoryTransport {
                state: state.clone(),
            },
            MemoryPeer { state },
        )
    }
}

impl Transport for MemoryTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(kind) = state.recv_error.take() {
            return Err(io::Error::from(kind));
        }

        let Some(chunk) = state.inbound.front_mut() else {
            return if state.peer_closed {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n == chunk.len() {
            state.inbound.pop_front();
        } else {
            chunk.drain(..n);
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.send_calls += 1;
        if state.writes_blocked {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = buf.len().min(state.send_budget.unwrap_or(usize::MAX));
        state.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state.lock().shutdown = true;
        Ok(())
    }
}

impl MemoryPeer {
    /// Queue one inbound chunk.
    pub fn push_inbound(&self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.state.lock().inbound.push_back(chunk.to_vec());
        }
    }

    /// Shut down the peer's send side; drained receives then return 0.
    pub fn close(&self) {
        self.state.lock().peer_closed = true;
    }

    /// Fail the next receive with `kind`.
    pub fn fail_next_recv(&self, kind: io::ErrorKind) {
        self.state.lock().recv_error = Some(kind);
    }

    /// Cap the bytes accepted per `send`. `None` accepts everything.
    pub fn set_send_budget(&self, budget: Option<usize>) {
        self.state.lock().send_budget = budget;
    }

    /// Make every `send` return `WouldBlock`.
    pub fn block_writes(&self, blocked: bool) {
        self.state.lock().writes_blocked = blocked;
    }

    /// Take everything written so far.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    /// Bytes written and not yet taken.
    pub fn outbound_len(&self) -> usize {
        self.state.lock().outbound.len()
    }

    /// Number of `send` calls made, including blocked ones.
    pub fn send_calls(&self) -> usize {
        self.state.lock().send_calls
    }

    /// Whether the socket shut the transport down.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}
