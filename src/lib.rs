//! # world-socket
//!
//! Connection-level transport engine for game servers.
//!
//! Each connection turns a non-blocking byte stream into a framed,
//! bidirectional packet channel:
//!
//! - **Input**: arbitrary fragments are reassembled into `(header, payload)`
//!   packets and handed to the bound [`Session`]
//! - **Output**: packets from any thread are coalesced into a fixed buffer,
//!   with an ordered overflow queue behind it, and written in large batches
//! - **Lifecycle**: close is idempotent from any thread; shared state is
//!   freed only after both the last handle and the final callback are gone
//!
//! Headers pass through a per-connection [`HeaderCrypt`]; payloads do not.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use world_socket::transport::SocketListener;
//! use world_socket::{Packet, PlainCrypt, Session, SocketConfig};
//!
//! struct Echo(world_socket::SocketHandle);
//!
//! impl Session for Echo {
//!     fn process_incoming(&self, packet: Packet) -> world_socket::Result<()> {
//!         self.0.send_packet(packet)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> world_socket::Result<()> {
//!     let listener = SocketListener::bind("0.0.0.0:8085", SocketConfig::default()).await?;
//!     let mut sessions = Vec::new();
//!     loop {
//!         let (_handle, _task) = listener
//!             .accept(PlainCrypt, |handle| {
//!                 let session = Arc::new(Echo(handle.clone()));
//!                 handle.set_session(&session);
//!                 sessions.push(session);
//!             })
//!             .await?;
//!     }
//! }
//! ```

pub mod config;
pub mod crypt;
pub mod driver;
pub mod error;
pub mod output;
pub mod protocol;
pub mod reactor;
pub mod socket;
pub mod transport;

mod ping;
mod session;

pub use config::SocketConfig;
pub use crypt::{HeaderCrypt, HeaderDecrypt, HeaderEncrypt, PlainCrypt};
pub use error::{Result, SocketError};
pub use output::PendingOutput;
pub use protocol::{HeaderShape, Packet, Role};
pub use reactor::{CloseReason, NullReactor, Progress, Reactor, Session, Transport};
pub use socket::{Socket, SocketBuilder, SocketHandle, SocketState, RECV_SCRATCH_SIZE};
