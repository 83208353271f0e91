//! Tokio dispatch substrate: one task per connection.
//!
//! The task owns the dispatch side of the socket and turns tokio readiness
//! into socket callbacks:
//!
//! ```text
//!            ┌─ stream.readable()  ─► handle_input (repeated while MoreWork)
//! select! ───┼─ stream.writable()  ─► handle_output   (only while registered)
//!            ├─ interval tick      ─► update
//!            └─ notified           ─► re-check registration / close request
//! ```
//!
//! When the loop ends for any reason the task calls `handle_close`, which is
//! the last callback the socket ever sees.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SocketConfig;
use crate::crypt::HeaderCrypt;
use crate::error::{Result, SocketError};
use crate::protocol::Role;
use crate::reactor::{CloseReason, Progress, Reactor};
use crate::socket::{Socket, SocketBuilder, SocketHandle};
use crate::transport::TcpTransport;

/// Join handle of a connection task. Resolves after `handle_close`.
pub type SocketTask = JoinHandle<Result<()>>;

/// The driver's side of a connection's reactor registration.
#[derive(Debug, Default)]
pub struct DriverRegistration {
    write_interest: AtomicBool,
    close_requested: AtomicBool,
    notify: Notify,
}

impl DriverRegistration {
    /// Whether the task is currently polling for write-readiness.
    pub fn wants_write(&self) -> bool {
        self.write_interest.load(Ordering::Acquire)
    }

    /// Whether the socket asked the task to tear the connection down.
    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }
}

impl Reactor for DriverRegistration {
    fn register_input(&self) -> io::Result<()> {
        // The task always polls read-readiness.
        Ok(())
    }

    fn schedule_output(&self) -> io::Result<()> {
        self.write_interest.store(true, Ordering::Release);
        self.notify.notify_one();
        Ok(())
    }

    fn cancel_output(&self) -> io::Result<()> {
        self.write_interest.store(false, Ordering::Release);
        Ok(())
    }

    fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Open a socket over `stream` and spawn the task that drives it.
///
/// `on_open` runs once the socket is open and before the task starts, so a
/// session can be bound before the first packet is read. Must be called
/// from within a tokio runtime.
pub fn spawn_socket<C, F>(
    stream: TcpStream,
    role: Role,
    crypt: C,
    config: SocketConfig,
    on_open: F,
) -> Result<(SocketHandle, SocketTask)>
where
    C: HeaderCrypt,
    F: FnOnce(&SocketHandle),
{
    let remote = stream.peer_addr()?.to_string();
    let stream = Arc::new(stream);
    let registration = Arc::new(DriverRegistration::default());
    let update_interval = config.update_interval();

    let mut socket = SocketBuilder::new(remote)
        .role(role)
        .config(config)
        .build(
            TcpTransport::new(stream.clone()),
            crypt,
            registration.clone(),
        )?;

    if let Err(e) = socket.open() {
        tracing::warn!(remote = %socket.handle().remote_address(), error = %e, "open failed");
        socket.handle_close(CloseReason::OpenFailed);
        return Err(e);
    }

    let handle = socket.handle().clone();
    on_open(&handle);

    let task = tokio::spawn(run_socket(socket, stream, registration, update_interval));
    Ok((handle, task))
}

/// Drive one connection until it closes.
async fn run_socket(
    mut socket: Socket<TcpTransport>,
    stream: Arc<TcpStream>,
    registration: Arc<DriverRegistration>,
    update_interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        if registration.is_close_requested() {
            break Err(SocketError::Closed);
        }
        let want_write = registration.wants_write();

        let step = tokio::select! {
            ready = stream.readable() => match ready {
                Ok(()) => drain_input(&mut socket),
                Err(e) => Err(readiness_failed(&socket, e)),
            },
            ready = stream.writable(), if want_write => match ready {
                Ok(()) => socket.handle_output().map(|_| ()),
                Err(e) => Err(readiness_failed(&socket, e)),
            },
            _ = ticker.tick() => socket.update().map(|_| ()),
            _ = registration.notify.notified() => Ok(()),
        };

        if let Err(e) = step {
            break Err(e);
        }
    };

    let reason = match &outcome {
        Ok(()) => CloseReason::Requested,
        Err(e) => CloseReason::from(e),
    };
    socket.handle_close(reason);

    match outcome {
        Err(e) if !e.is_graceful() => Err(e),
        _ => Ok(()),
    }
}

fn drain_input(socket: &mut Socket<TcpTransport>) -> Result<()> {
    while socket.handle_input()? == Progress::MoreWork {}
    Ok(())
}

fn readiness_failed(socket: &Socket<TcpTransport>, error: io::Error) -> SocketError {
    tracing::error!(
        remote = %socket.handle().remote_address(),
        error = %error,
        "readiness poll failed"
    );
    socket.handle().close_socket();
    SocketError::Io(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_tracks_write_interest() {
        let registration = DriverRegistration::default();
        assert!(!registration.wants_write());

        registration.schedule_output().unwrap();
        assert!(registration.wants_write());

        registration.cancel_output().unwrap();
        assert!(!registration.wants_write());
    }

    #[tokio::test]
    async fn test_close_request_wakes_waiter() {
        let registration = Arc::new(DriverRegistration::default());
        let waiter = {
            let registration = registration.clone();
            tokio::spawn(async move {
                registration.notify.notified().await;
                registration.is_close_requested()
            })
        };

        registration.request_close();
        assert!(waiter.await.unwrap());
    }
}
