//! Socket configuration.
//!
//! Every field has a default taken from production game servers, so an empty
//! JSON object is a valid configuration:
//!
//! ```
//! use world_socket::SocketConfig;
//!
//! let config = SocketConfig::from_json_str(r#"{ "max_payload_size": 4096 }"#).unwrap();
//! assert_eq!(config.max_payload_size, 4096);
//! assert_eq!(config.out_buffer_size, 65536);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SocketError};
use crate::protocol::MAX_HEADER_SIZE;

/// Default output buffer capacity (64 KB).
pub const DEFAULT_OUT_BUFFER_SIZE: usize = 65536;

/// Default maximum declared inbound payload.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10240;

/// Default maximum inbound opcode on server-side sockets.
pub const DEFAULT_MAX_INBOUND_OPCODE: u32 = 10240;

/// Default `update` cadence.
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 10;

/// Default minimum spacing between two pings.
pub const DEFAULT_MIN_PING_INTERVAL_MS: u64 = 27_000;

/// Default number of too-early pings tolerated.
pub const DEFAULT_MAX_OVERSPEED_PINGS: u32 = 2;

/// Per-socket tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    /// Capacity of the output buffer; never resized.
    pub out_buffer_size: usize,
    /// Largest payload an inbound header may declare.
    pub max_payload_size: usize,
    /// Largest opcode accepted from clients (server-side sockets only).
    pub max_inbound_opcode: u32,
    /// Cap on the overflow queue. `None` keeps it unbounded.
    pub max_queued_packets: Option<usize>,
    /// Interval between `update` calls issued by the bundled driver.
    pub update_interval_ms: u64,
    /// Pings closer together than this count as over-speed.
    pub min_ping_interval_ms: u64,
    /// Over-speed pings allowed before the guard trips. `0` disables it.
    pub max_overspeed_pings: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            out_buffer_size: DEFAULT_OUT_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_inbound_opcode: DEFAULT_MAX_INBOUND_OPCODE,
            max_queued_packets: None,
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            min_ping_interval_ms: DEFAULT_MIN_PING_INTERVAL_MS,
            max_overspeed_pings: DEFAULT_MAX_OVERSPEED_PINGS,
        }
    }
}

impl SocketConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Set the output buffer capacity.
    pub fn with_out_buffer_size(mut self, size: usize) -> Self {
        self.out_buffer_size = size;
        self
    }

    /// Set the maximum inbound payload size.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the maximum inbound opcode.
    pub fn with_max_inbound_opcode(mut self, opcode: u32) -> Self {
        self.max_inbound_opcode = opcode;
        self
    }

    /// Cap the overflow queue.
    pub fn with_max_queued_packets(mut self, limit: usize) -> Self {
        self.max_queued_packets = Some(limit);
        self
    }

    /// Set the driver's update cadence.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Configure the ping flood guard.
    pub fn with_ping_guard(mut self, min_interval: Duration, max_overspeed: u32) -> Self {
        self.min_ping_interval_ms = min_interval.as_millis() as u64;
        self.max_overspeed_pings = max_overspeed;
        self
    }

    /// Interval between driver `update` ticks.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Minimum spacing between two pings.
    pub fn min_ping_interval(&self) -> Duration {
        Duration::from_millis(self.min_ping_interval_ms)
    }

    /// Check invariants the socket relies on.
    pub fn validate(&self) -> Result<()> {
        if self.out_buffer_size < MAX_HEADER_SIZE {
            return Err(SocketError::Config(format!(
                "out_buffer_size {} cannot hold a single header",
                self.out_buffer_size
            )));
        }
        if self.update_interval_ms == 0 {
            return Err(SocketError::Config(
                "update_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_queued_packets == Some(0) {
            return Err(SocketError::Config(
                "max_queued_packets must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.out_buffer_size, 65536);
        assert_eq!(config.max_payload_size, 10240);
        assert_eq!(config.max_queued_packets, None);
        assert_eq!(config.update_interval(), Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = SocketConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SocketConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config =
            SocketConfig::from_json_str(r#"{"out_buffer_size": 1024, "max_queued_packets": 64}"#)
                .unwrap();
        assert_eq!(config.out_buffer_size, 1024);
        assert_eq!(config.max_queued_packets, Some(64));
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = SocketConfig::from_json_str(r#"{"out_buffer": 1024}"#);
        assert!(matches!(result, Err(SocketError::Json(_))));
    }

    #[test]
    fn test_validation_failures() {
        let tiny = SocketConfig::default().with_out_buffer_size(3);
        assert!(matches!(tiny.validate(), Err(SocketError::Config(_))));

        let result = SocketConfig::from_json_str(r#"{"update_interval_ms": 0}"#);
        assert!(matches!(result, Err(SocketError::Config(_))));

        let result = SocketConfig::from_json_str(r#"{"max_queued_packets": 0}"#);
        assert!(matches!(result, Err(SocketError::Config(_))));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_inbound_opcode": 512}}"#).unwrap();

        let config = SocketConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_inbound_opcode, 512);
    }

    #[test]
    fn test_builder_methods() {
        let config = SocketConfig::default()
            .with_out_buffer_size(2048)
            .with_max_payload_size(100)
            .with_max_inbound_opcode(50)
            .with_max_queued_packets(10)
            .with_update_interval(Duration::from_millis(25))
            .with_ping_guard(Duration::from_secs(5), 0);

        assert_eq!(config.out_buffer_size, 2048);
        assert_eq!(config.max_payload_size, 100);
        assert_eq!(config.max_inbound_opcode, 50);
        assert_eq!(config.max_queued_packets, Some(10));
        assert_eq!(config.update_interval_ms, 25);
        assert_eq!(config.min_ping_interval(), Duration::from_secs(5));
        assert_eq!(config.max_overspeed_pings, 0);
    }

    #[test]
    fn test_ping_guard_keeps_sub_second_interval() {
        let config = SocketConfig::default().with_ping_guard(Duration::from_millis(500), 3);
        assert_eq!(config.min_ping_interval(), Duration::from_millis(500));

        let config = SocketConfig::default().with_ping_guard(Duration::from_millis(1500), 3);
        assert_eq!(config.min_ping_interval(), Duration::from_millis(1500));
    }
}
