//! Echo server - accept one connection and send every packet straight back.
//!
//! This example demonstrates:
//! - Binding a `SocketListener` and binding a session in `on_open`
//! - Replying through the `SocketHandle` the session holds
//! - Connecting a client socket and reading the echoes through a channel
//! - Closing from one side and waiting for both driver tasks to finish
//!
//! # Running
//!
//! ```text
//! RUST_LOG=world_socket=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use world_socket::transport::{connect, SocketListener};
use world_socket::{Packet, PlainCrypt, Session, SocketConfig, SocketError, SocketHandle};

/// Server side: reply with the same opcode and payload.
struct Echo {
    handle: SocketHandle,
}

impl Session for Echo {
    fn process_incoming(&self, packet: Packet) -> world_socket::Result<()> {
        self.handle.send_packet(packet)
    }
}

/// Client side: hand each reply to `main`.
struct Replies {
    tx: UnboundedSender<Packet>,
}

impl Session for Replies {
    fn process_incoming(&self, packet: Packet) -> world_socket::Result<()> {
        self.tx.send(packet).map_err(|_| SocketError::Closed)
    }
}

/// Accept a single connection and echo until the peer goes away.
async fn serve_one(listener: SocketListener) -> world_socket::Result<()> {
    // The socket only keeps a weak reference, so the session lives here.
    let mut echo = None;
    let (_handle, task) = listener
        .accept(PlainCrypt, |handle| {
            let session = Arc::new(Echo {
                handle: handle.clone(),
            });
            handle.set_session(&session);
            echo = Some(session);
        })
        .await?;
    let result = task.await;
    drop(echo);
    result.map_err(|e| SocketError::Io(e.into()))?
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = SocketListener::bind("127.0.0.1:0", SocketConfig::default()).await?;
    let addr = listener.local_addr()?;
    println!("listening on {addr}");

    let server = tokio::spawn(serve_one(listener));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let replies = Arc::new(Replies { tx });
    let (client, client_task) = connect(addr, PlainCrypt, SocketConfig::default(), |handle| {
        handle.set_session(&replies);
    })
    .await?;
    println!("seed {:#010x}", client.seed());

    for (opcode, text) in ["hello", "from", "the", "client"].iter().enumerate() {
        client.send_packet(Packet::from_slice(opcode as u32, text.as_bytes()))?;
    }

    for _ in 0..4 {
        let Some(packet) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await? else {
            break;
        };
        println!(
            "echo opcode={} payload={:?}",
            packet.opcode,
            String::from_utf8_lossy(packet.payload())
        );
    }

    // Closing the client ends the server task once it reads EOF.
    client.close_socket();
    client_task.await??;
    server.await??;

    Ok(())
}
