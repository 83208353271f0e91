//! Error types for world-socket.

use thiserror::Error;

/// Main error type for all socket operations.
///
/// Every variant except [`SocketError::QueueFull`] and
/// [`SocketError::InvalidPacket`] is fatal to the connection it was raised on.
#[derive(Debug, Error)]
pub enum SocketError {
    /// I/O error during a receive or send.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer shut down its send side (zero-byte receive).
    #[error("Connection closed by peer")]
    PeerClosed,

    /// Protocol violation (undecodable header, oversized payload, bad opcode).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Buffer allocation failed.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The socket is closing or closed.
    #[error("Socket closed")]
    Closed,

    /// The packet can never be framed on this socket.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// The overflow queue reached its configured cap.
    #[error("Overflow queue full ({limit} packets)")]
    QueueFull { limit: usize },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SocketError {
    /// True for an orderly shutdown by either side.
    pub fn is_graceful(&self) -> bool {
        matches!(self, SocketError::PeerClosed | SocketError::Closed)
    }

    /// True if the error requires tearing the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SocketError::QueueFull { .. } | SocketError::InvalidPacket(_) | SocketError::Config(_)
        )
    }
}

/// Result type alias using SocketError.
pub type Result<T> = std::result::Result<T, SocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graceful_classification() {
        assert!(SocketError::PeerClosed.is_graceful());
        assert!(SocketError::Closed.is_graceful());
        assert!(!SocketError::Protocol("bad".into()).is_graceful());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SocketError::Protocol("bad".into()).is_fatal());
        assert!(SocketError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_fatal());
        assert!(!SocketError::QueueFull { limit: 4 }.is_fatal());
        assert!(!SocketError::InvalidPacket("too big".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = SocketError::QueueFull { limit: 8 };
        assert_eq!(err.to_string(), "Overflow queue full (8 packets)");
    }
}
