//! The broadcast hub.
//!
//! A [`Hub`] ties the registry, hibernation adapter, keepalive monitor and
//! router together behind the entry points a server calls. A hub holds no
//! state that cannot be rebuilt from its [`SocketHost`]; dropping it and
//! creating a new one over the same host is a hibernation cycle.

use beacon_protocol::Envelope;
use beacon_transport::{close_code, Socket, SocketHost, SocketId, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::connection::{Connection, ConnectionId};
use crate::error::HubError;
use crate::hibernation::{Dispatch, HibernationAdapter, WakeReport};
use crate::keepalive::{KeepaliveConfig, KeepaliveMonitor};
use crate::registry::Registry;
use crate::router::{BroadcastReport, BroadcastRouter};

/// Hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Keepalive thresholds.
    pub keepalive: KeepaliveConfig,
    /// Relay client `message` frames to every dashboard as `hello`.
    pub relay_client_messages: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            keepalive: KeepaliveConfig::default(),
            relay_client_messages: true,
        }
    }
}

/// Hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered connections.
    pub connections: usize,
    /// Broadcasts fanned out since the hub was created.
    pub broadcasts: u64,
    /// Frames queued by those broadcasts.
    pub frames_delivered: u64,
    /// Connections evicted by fan-out or keepalive.
    pub connections_dropped: u64,
}

/// The broadcast hub.
pub struct Hub {
    config: HubConfig,
    registry: Arc<Registry>,
    adapter: Arc<HibernationAdapter>,
    router: BroadcastRouter,
    monitor: KeepaliveMonitor,
    clock: Arc<dyn Clock>,
    awake: AtomicBool,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new(host: Arc<dyn SocketHost>) -> Self {
        Self::with_config(host, HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(host: Arc<dyn SocketHost>, config: HubConfig) -> Self {
        Self::with_clock(host, config, Arc::new(SystemClock))
    }

    /// Create a hub with a custom clock.
    #[must_use]
    pub fn with_clock(
        host: Arc<dyn SocketHost>,
        config: HubConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let monitor = KeepaliveMonitor::new(config.keepalive);
        let adapter = Arc::new(HibernationAdapter::new(
            host,
            Arc::clone(&registry),
            monitor,
        ));
        let router = BroadcastRouter::new(Arc::clone(&adapter));

        Self {
            config,
            registry,
            adapter,
            router,
            monitor,
            clock,
            awake: AtomicBool::new(false),
            broadcasts: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The socket host this hub restores from.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn SocketHost> {
        self.adapter.host()
    }

    /// Accept a new dashboard socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is already closed or its attachment
    /// record cannot be written.
    pub fn attach(
        &self,
        socket: Arc<dyn Socket>,
        tag: Option<String>,
    ) -> Result<ConnectionId, HubError> {
        self.wake();
        let conn = self
            .adapter
            .on_attach(socket, tag, self.clock.now_millis())?;
        Ok(conn.id)
    }

    /// Handle one inbound frame from a dashboard.
    ///
    /// Relayed client messages are broadcast before this returns, keeping
    /// their top-level `ic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket could not be resolved or its pong could
    /// not be queued. In both cases the socket has already been dealt with.
    pub fn on_message(&self, socket: &Arc<dyn Socket>, raw: &[u8]) -> Result<Dispatch, HubError> {
        let dispatch = self
            .adapter
            .on_message(socket, raw, self.clock.now_millis())?;

        if let Dispatch::Relay(envelope) = &dispatch {
            if self.config.relay_client_messages {
                let mut hello = Envelope::hello(envelope.data.clone().unwrap_or(Value::Null));
                if let Some(ic) = &envelope.ic {
                    hello = hello.with_ic(ic.as_str());
                }
                debug!(socket = %socket.id(), "Relaying client message");
                self.broadcast_envelope(&hello)?;
            }
        }
        Ok(dispatch)
    }

    /// The dashboard closed its socket.
    pub fn on_close(&self, socket: &SocketId, code: u16, reason: &str) -> Option<Connection> {
        self.adapter.on_close(socket, code, reason)
    }

    /// The dashboard's socket failed.
    pub fn on_error(&self, socket: &SocketId, err: &TransportError) -> Option<Connection> {
        self.adapter.on_error(socket, err)
    }

    /// Broadcast a trigger payload to every live dashboard as `hello`.
    ///
    /// Wakes the hub and prunes dead connections first, so a connection that
    /// stopped pinging never receives the frame.
    ///
    /// # Errors
    ///
    /// Returns an error only if the payload cannot be encoded.
    pub fn broadcast(&self, data: Value) -> Result<BroadcastReport, HubError> {
        self.broadcast_envelope(&Envelope::hello(data))
    }

    /// Broadcast a prebuilt envelope.
    ///
    /// # Errors
    ///
    /// Returns an error only if the envelope cannot be encoded.
    pub fn broadcast_envelope(&self, envelope: &Envelope) -> Result<BroadcastReport, HubError> {
        self.wake();
        self.prune_dead();

        let report = self.router.send(envelope)?;
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Evict every connection that has been silent for too long.
    ///
    /// Returns the evicted IDs.
    pub fn prune_dead(&self) -> Vec<ConnectionId> {
        let now = self.clock.now_millis();
        let dead = self.monitor.dead_connections(&self.registry, now);

        for conn in &dead {
            info!(
                connection = %conn.id,
                silent_ms = now.saturating_sub(conn.last_seen),
                "Keepalive timeout"
            );
            self.adapter
                .evict(conn, close_code::GOING_AWAY, "keepalive timeout");
        }

        self.dropped.fetch_add(dead.len() as u64, Ordering::Relaxed);
        dead.into_iter().map(|c| c.id).collect()
    }

    /// Rebuild the registry from the socket host if this hub has not done so
    /// yet.
    ///
    /// Returns `None` if the hub was already awake.
    pub fn wake(&self) -> Option<WakeReport> {
        if self.awake.swap(true, Ordering::AcqRel) {
            return None;
        }
        let report = self.adapter.wake();
        if report.rejected > 0 {
            warn!(rejected = report.rejected, "Some sockets could not be restored");
        }
        Some(report)
    }

    /// Drop all in-memory state. The next call into the hub rebuilds it.
    ///
    /// Returns the number of connections hibernated.
    pub fn hibernate(&self) -> usize {
        let count = self.adapter.hibernate();
        self.awake.store(false, Ordering::Release);
        info!(count, "Hub hibernated");
        count
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            connections_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
