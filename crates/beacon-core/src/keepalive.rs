//! Keepalive monitoring.
//!
//! Dashboards ping every 30 seconds; the hub answers each ping with a pong and
//! treats any connection that stays silent for several ping intervals as dead.
//! The monitor owns no timers. Liveness is always computed from the
//! `last_seen` value that is mirrored into the attachment record, so it gives
//! the same answer before and after the hub is rebuilt.

use beacon_protocol::Envelope;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

use crate::connection::Connection;
use crate::registry::Registry;

/// Default client ping cadence.
pub const DEFAULT_CLIENT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of silent intervals before a connection is dead.
pub const DEFAULT_DEAD_AFTER_INTERVALS: u32 = 3;

/// Keepalive configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// How often clients are expected to ping.
    pub client_ping_interval: Duration,
    /// Silent intervals tolerated before eviction.
    pub dead_after_intervals: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            client_ping_interval: DEFAULT_CLIENT_PING_INTERVAL,
            dead_after_intervals: DEFAULT_DEAD_AFTER_INTERVALS,
        }
    }
}

impl KeepaliveConfig {
    /// Silence after which a connection is dead.
    #[must_use]
    pub fn dead_after(&self) -> Duration {
        self.client_ping_interval
            .saturating_mul(self.dead_after_intervals.max(1))
    }
}

/// Per-connection ping/pong timestamps (Unix ms).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveEntry {
    /// Last `ping` received from the client.
    pub last_ping_received: Option<u64>,
    /// Last `pong` queued to the client.
    pub last_pong_sent: Option<u64>,
}

/// Liveness rules applied to registry entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
}

impl KeepaliveMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(config: KeepaliveConfig) -> Self {
        Self { config }
    }

    /// Monitor configuration.
    #[must_use]
    pub fn config(&self) -> &KeepaliveConfig {
        &self.config
    }

    /// Record an inbound frame of any kind.
    pub fn observe(&self, conn: &mut Connection, now: u64) {
        conn.last_seen = conn.last_seen.max(now);
    }

    /// Record a client ping and build the pong that answers it.
    pub fn answer_ping(&self, conn: &mut Connection, now: u64) -> Envelope {
        conn.keepalive.last_ping_received = Some(now);
        conn.keepalive.last_pong_sent = Some(now);
        trace!(connection = %conn.id, "Answering ping");
        Envelope::pong()
    }

    /// Check a last-seen timestamp against the dead-connection threshold.
    #[must_use]
    pub fn is_dead(&self, last_seen: u64, now: u64) -> bool {
        let threshold = self.config.dead_after().as_millis() as u64;
        now.saturating_sub(last_seen) > threshold
    }

    /// Connections in the registry that have been silent for too long.
    #[must_use]
    pub fn dead_connections(&self, registry: &Registry, now: u64) -> Vec<Connection> {
        registry
            .snapshot()
            .into_iter()
            .filter(|conn| self.is_dead(conn.last_seen, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::MemorySocket;

    #[test]
    fn test_dead_after() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.dead_after(), Duration::from_secs(90));

        let zero = KeepaliveConfig {
            client_ping_interval: Duration::from_secs(10),
            dead_after_intervals: 0,
        };
        assert_eq!(zero.dead_after(), Duration::from_secs(10));
    }

    #[test]
    fn test_is_dead_threshold() {
        let monitor = KeepaliveMonitor::default();
        assert!(!monitor.is_dead(0, 90_000));
        assert!(monitor.is_dead(0, 90_001));
        // Clock skew backwards never marks a connection dead.
        assert!(!monitor.is_dead(5_000, 1_000));
    }

    #[test]
    fn test_answer_ping_records_timestamps() {
        let monitor = KeepaliveMonitor::default();
        let (socket, _peer) = MemorySocket::pair(4);
        let mut conn = Connection::new(socket, None, 0);

        monitor.observe(&mut conn, 1_500);
        let pong = monitor.answer_ping(&mut conn, 1_500);

        assert_eq!(pong, Envelope::pong());
        assert_eq!(conn.last_seen, 1_500);
        assert_eq!(conn.keepalive.last_ping_received, Some(1_500));
        assert_eq!(conn.keepalive.last_pong_sent, Some(1_500));
    }

    #[test]
    fn test_observe_never_moves_backwards() {
        let monitor = KeepaliveMonitor::default();
        let (socket, _peer) = MemorySocket::pair(4);
        let mut conn = Connection::new(socket, None, 2_000);
        monitor.observe(&mut conn, 1_000);
        assert_eq!(conn.last_seen, 2_000);
    }

    #[test]
    fn test_dead_connections() {
        let monitor = KeepaliveMonitor::default();
        let registry = Registry::new();
        let (fresh, _p1) = MemorySocket::pair(4);
        let (stale, _p2) = MemorySocket::pair(4);
        registry.register(Connection::new(fresh, None, 100_000)).unwrap();
        let stale_id = registry.register(Connection::new(stale, None, 0)).unwrap();

        let dead = monitor.dead_connections(&registry, 120_000);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, stale_id);
    }
}
