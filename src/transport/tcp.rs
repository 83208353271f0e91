//! TCP transport plus accept/connect helpers for the tokio driver.
//!
//! # Example
//!
//! ```no_run
//! use world_socket::transport::SocketListener;
//! use world_socket::{PlainCrypt, SocketConfig};
//!
//! # async fn run() -> world_socket::Result<()> {
//! let listener = SocketListener::bind("0.0.0.0:8085", SocketConfig::default()).await?;
//! loop {
//!     let (handle, _task) = listener.accept(PlainCrypt, |_handle| {}).await?;
//!     println!("accepted {}", handle.remote_address());
//! }
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::config::SocketConfig;
use crate::crypt::HeaderCrypt;
use crate::driver::{spawn_socket, SocketTask};
use crate::error::Result;
use crate::protocol::Role;
use crate::reactor::Transport;
use crate::socket::SocketHandle;

/// Non-blocking view of a tokio `TcpStream`.
///
/// The driver keeps a second reference to await readiness; the connection
/// closes once both are dropped.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Arc<TcpStream>,
}

impl TcpTransport {
    pub(crate) fn new(stream: Arc<TcpStream>) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }
}

/// Listens for game clients and spawns a server-side socket per connection.
pub struct SocketListener {
    listener: TcpListener,
    config: SocketConfig,
}

impl SocketListener {
    /// Bind to `addr`. The configuration is validated up front.
    pub async fn bind(addr: impl ToSocketAddrs, config: SocketConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::debug!(local = ?listener.local_addr().ok(), "listening");
        Ok(Self { listener, config })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and start driving it.
    ///
    /// `on_open` runs after `open` succeeds and before the first read, so a
    /// session bound there sees every inbound packet.
    pub async fn accept<C, F>(&self, crypt: C, on_open: F) -> Result<(SocketHandle, SocketTask)>
    where
        C: HeaderCrypt,
        F: FnOnce(&SocketHandle),
    {
        let (stream, _addr) = self.listener.accept().await?;
        spawn_socket(stream, Role::Server, crypt, self.config.clone(), on_open)
    }
}

/// Connect to a server and drive the connection as the client end.
pub async fn connect<C, F>(
    addr: impl ToSocketAddrs,
    crypt: C,
    config: SocketConfig,
    on_open: F,
) -> Result<(SocketHandle, SocketTask)>
where
    C: HeaderCrypt,
    F: FnOnce(&SocketHandle),
{
    let stream = TcpStream::connect(addr).await?;
    spawn_socket(stream, Role::Client, crypt, config, on_open)
}
