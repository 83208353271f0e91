//! Ping flood guard.
//!
//! Clients ping on a fixed cadence. A ping arriving well before the previous
//! one is due counts as over-speed; too many in a row mean a flooding peer.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Result, SocketError};

const NO_PING: u64 = u64::MAX;

/// Lock-free ping bookkeeping for one connection.
#[derive(Debug)]
pub(crate) struct PingGuard {
    origin: Instant,
    last_ping_ms: AtomicU64,
    overspeed: AtomicU32,
    min_interval: Duration,
    max_overspeed: u32,
}

impl PingGuard {
    pub(crate) fn new(origin: Instant, min_interval: Duration, max_overspeed: u32) -> Self {
        Self {
            origin,
            last_ping_ms: AtomicU64::new(NO_PING),
            overspeed: AtomicU32::new(0),
            min_interval,
            max_overspeed,
        }
    }

    /// Record a ping received at `now`.
    ///
    /// # Errors
    ///
    /// [`SocketError::Protocol`] once more than `max_overspeed` pings in a
    /// row arrived too early.
    pub(crate) fn record(&self, now: Instant) -> Result<()> {
        let now_ms = now.saturating_duration_since(self.origin).as_millis() as u64;
        let last_ms = self.last_ping_ms.swap(now_ms, Ordering::AcqRel);
        if last_ms == NO_PING {
            return Ok(());
        }

        let elapsed = Duration::from_millis(now_ms.saturating_sub(last_ms));
        if elapsed >= self.min_interval {
            self.overspeed.store(0, Ordering::Release);
            return Ok(());
        }

        let count = self.overspeed.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_overspeed != 0 && count > self.max_overspeed {
            return Err(SocketError::Protocol(format!(
                "ping flood: {} pings within {:?}",
                count, self.min_interval
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn overspeed_count(&self) -> u32 {
        self.overspeed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(27);

    #[test]
    fn test_first_ping_only_records() {
        let origin = Instant::now();
        let guard = PingGuard::new(origin, INTERVAL, 2);
        guard.record(origin).unwrap();
        assert_eq!(guard.overspeed_count(), 0);
    }

    #[test]
    fn test_flood_trips_after_limit() {
        let origin = Instant::now();
        let guard = PingGuard::new(origin, INTERVAL, 2);
        let second = Duration::from_secs(1);

        guard.record(origin).unwrap();
        guard.record(origin + second).unwrap();
        guard.record(origin + second * 2).unwrap();
        assert_eq!(guard.overspeed_count(), 2);

        let result = guard.record(origin + second * 3);
        assert!(matches!(result, Err(SocketError::Protocol(_))));
    }

    #[test]
    fn test_proper_interval_resets_counter() {
        let origin = Instant::now();
        let guard = PingGuard::new(origin, INTERVAL, 2);

        guard.record(origin).unwrap();
        guard.record(origin + Duration::from_secs(1)).unwrap();
        assert_eq!(guard.overspeed_count(), 1);

        guard.record(origin + Duration::from_secs(30)).unwrap();
        assert_eq!(guard.overspeed_count(), 0);
    }

    #[test]
    fn test_zero_limit_disables_guard() {
        let origin = Instant::now();
        let guard = PingGuard::new(origin, INTERVAL, 0);
        for i in 0..10 {
            guard.record(origin + Duration::from_millis(i)).unwrap();
        }
        assert_eq!(guard.overspeed_count(), 9);
    }
}
