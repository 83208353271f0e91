//! Transport module - concrete byte streams behind the `Transport` trait.
//!
//! Provides:
//! - TCP via tokio, with listener/connector helpers
//! - An in-memory pair for driving sockets by hand

mod memory;
mod tcp;

pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::{connect, SocketListener, TcpTransport};
