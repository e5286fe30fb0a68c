//! Hibernation adapter.
//!
//! Keeps registry membership recoverable from the socket host alone. Every
//! change to a connection's restart-critical fields is mirrored into the
//! socket's attachment record, and any registry entry can be rebuilt from
//! that record after the hub has been torn down.

use beacon_protocol::{codec, Envelope, FrameType};
use beacon_transport::{close_code, Socket, SocketHost, SocketId, TransportError};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::attachment::AttachmentRecord;
use crate::connection::{Connection, ConnectionState, MAX_TAG_LENGTH};
use crate::error::HubError;
use crate::keepalive::KeepaliveMonitor;
use crate::registry::Registry;

/// What an inbound frame turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A `ping`; a `pong` was queued on the same socket.
    Pong,
    /// A client `message` to relay to every dashboard.
    Relay(Envelope),
    /// A well-formed frame the hub does not act on.
    Ignored(FrameType),
    /// The frame did not decode and was dropped.
    Malformed,
}

/// Outcome of rebuilding the registry from the socket host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeReport {
    /// Entries rebuilt from attachment records.
    pub restored: usize,
    /// Sockets closed because their record was missing or corrupt.
    pub rejected: usize,
    /// Registry entries removed because their socket had closed.
    pub pruned: usize,
}

/// Bridges the registry and the socket host.
pub struct HibernationAdapter {
    host: Arc<dyn SocketHost>,
    registry: Arc<Registry>,
    monitor: KeepaliveMonitor,
}

impl HibernationAdapter {
    /// Create an adapter over a socket host and a registry.
    #[must_use]
    pub fn new(
        host: Arc<dyn SocketHost>,
        registry: Arc<Registry>,
        monitor: KeepaliveMonitor,
    ) -> Self {
        Self {
            host,
            registry,
            monitor,
        }
    }

    /// The socket host.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn SocketHost> {
        &self.host
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Attach a newly accepted socket.
    ///
    /// The attachment record is encoded first and handed to the host together
    /// with the socket, so the host never lists the socket without a record.
    /// Attaching a socket that is already registered returns the existing
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is already closed or the record cannot
    /// be encoded.
    pub fn on_attach(
        &self,
        socket: Arc<dyn Socket>,
        tag: Option<String>,
        now: u64,
    ) -> Result<Connection, HubError> {
        if !socket.is_open() {
            return Err(HubError::SocketClosed(socket.id().clone()));
        }
        if let Some(existing) = self.registry.get_by_socket(socket.id()) {
            trace!(connection = %existing.id, "Socket already attached");
            return Ok(existing);
        }

        let tag = tag.filter(|t| {
            let fits = t.len() <= MAX_TAG_LENGTH;
            if !fits {
                warn!(socket = %socket.id(), len = t.len(), "Dropping oversized attachment tag");
            }
            fits
        });

        let conn = Connection::new(Arc::clone(&socket), tag, now);
        let record = AttachmentRecord::of(&conn).encode()?;
        self.host.adopt(socket, record);

        let id = match self.registry.register(conn.clone()) {
            Ok(id) => id,
            Err(e) => {
                self.host.release(conn.socket_id());
                return Err(e);
            }
        };
        debug!(
            connection = %id,
            socket = %conn.socket_id(),
            remote = ?conn.socket.remote_addr(),
            tag = ?conn.tag,
            "Attached"
        );
        Ok(self.registry.get(&id).unwrap_or(conn))
    }

    /// Rebuild the registry entry for an already-open socket from its
    /// attachment record.
    ///
    /// Restoring a socket that is already registered leaves the existing entry
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or corrupt, or if its
    /// connection ID is already held by another socket.
    pub fn on_restore(&self, socket: &Arc<dyn Socket>) -> Result<AttachmentRecord, HubError> {
        let data = self
            .host
            .deserialize_attachment(socket.id())
            .ok_or_else(|| HubError::MissingAttachment(socket.id().clone()))?;
        let record = AttachmentRecord::decode(socket.id(), &data)?;

        let conn = record.clone().into_connection(Arc::clone(socket));
        let id = self.registry.register(conn)?;
        if record.state != ConnectionState::Active {
            if let Some(conn) = self.registry.get(&id) {
                self.persist_or_warn(&conn);
            }
        }

        debug!(connection = %id, socket = %socket.id(), "Restored from attachment");
        Ok(record)
    }

    /// Find the registry entry for a socket, restoring it on first touch.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed or cannot be restored.
    pub fn resolve(&self, socket: &Arc<dyn Socket>) -> Result<Connection, HubError> {
        if let Some(conn) = self.registry.get_by_socket(socket.id()) {
            return Ok(conn);
        }
        if !socket.is_open() {
            return Err(HubError::SocketClosed(socket.id().clone()));
        }

        self.on_restore(socket)?;
        self.registry
            .get_by_socket(socket.id())
            .ok_or_else(|| HubError::MissingAttachment(socket.id().clone()))
    }

    /// Handle one inbound frame.
    ///
    /// Any frame, well-formed or not, counts as activity. Malformed frames are
    /// dropped without closing the socket; `ping` is answered with `pong`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be resolved (it is then closed)
    /// or if the pong cannot be queued (the connection is then evicted).
    pub fn on_message(
        &self,
        socket: &Arc<dyn Socket>,
        raw: &[u8],
        now: u64,
    ) -> Result<Dispatch, HubError> {
        let conn = match self.resolve(socket) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(socket = %socket.id(), error = %e, "Cannot resolve socket; closing");
                self.reject(socket.as_ref(), &e);
                return Err(e);
            }
        };

        let decoded = codec::decode(raw);
        let is_ping = matches!(&decoded, Ok(env) if env.frame_type() == FrameType::Ping);

        let mut pong = None;
        let Some(updated) = self.registry.update(&conn.id, |c| {
            self.monitor.observe(c, now);
            if is_ping {
                pong = Some(self.monitor.answer_ping(c, now));
            }
        }) else {
            trace!(connection = %conn.id, "Connection removed while handling frame");
            return Err(HubError::SocketClosed(socket.id().clone()));
        };
        self.persist_or_warn(&updated);

        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %updated.id, error = %e, "Dropping malformed frame");
                return Ok(Dispatch::Malformed);
            }
        };

        if let Some(pong) = pong {
            let frame = codec::encode(&pong)?;
            if let Err(e) = updated.socket.try_send(frame) {
                warn!(connection = %updated.id, error = %e, "Failed to queue pong");
                self.evict(&updated, close_code_for(&e), "pong not deliverable");
                return Err(e.into());
            }
            return Ok(Dispatch::Pong);
        }

        match envelope.frame_type() {
            FrameType::Message => Ok(Dispatch::Relay(envelope)),
            other => {
                trace!(connection = %updated.id, frame_type = %other, "Ignoring frame");
                Ok(Dispatch::Ignored(other))
            }
        }
    }

    /// The client closed its socket.
    pub fn on_close(&self, socket: &SocketId, code: u16, reason: &str) -> Option<Connection> {
        debug!(socket = %socket, code, reason, "Socket closed by client");
        self.forget(socket)
    }

    /// The socket failed.
    pub fn on_error(&self, socket: &SocketId, err: &TransportError) -> Option<Connection> {
        warn!(socket = %socket, error = %err, "Socket error");
        self.forget(socket)
    }

    /// Close a connection and drop every record of it.
    pub fn evict(&self, conn: &Connection, code: u16, reason: &str) {
        conn.socket.close(code, reason);
        self.registry.unregister(&conn.id);
        self.host.release(conn.socket_id());
        debug!(
            connection = %conn.id,
            remote = ?conn.socket.remote_addr(),
            code,
            reason,
            "Evicted"
        );
    }

    /// Mirror a connection's restart-critical fields into its attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the host no longer has the socket.
    pub fn persist(&self, conn: &Connection) -> Result<(), HubError> {
        let data = AttachmentRecord::of(conn).encode()?;
        self.host.serialize_attachment(conn.socket_id(), data)?;
        Ok(())
    }

    /// Rebuild the registry from every socket the host still holds open, and
    /// drop entries whose socket has closed.
    ///
    /// Running it twice, or in any order relative to [`Self::resolve`],
    /// yields the same registry.
    pub fn wake(&self) -> WakeReport {
        let mut report = WakeReport::default();

        for socket in self.host.sockets() {
            if self.registry.get_by_socket(socket.id()).is_some() {
                continue;
            }
            match self.on_restore(&socket) {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    warn!(socket = %socket.id(), error = %e, "Cannot restore socket; closing");
                    self.reject(socket.as_ref(), &e);
                    report.rejected += 1;
                }
            }
        }

        for conn in self.registry.snapshot() {
            if !conn.is_open() {
                self.registry.unregister(&conn.id);
                self.host.release(conn.socket_id());
                report.pruned += 1;
            }
        }

        debug!(
            restored = report.restored,
            rejected = report.rejected,
            pruned = report.pruned,
            "Woke from host"
        );
        report
    }

    /// Drop all in-memory state, marking every record `Hibernated`.
    ///
    /// Returns the number of connections that were hibernated.
    pub fn hibernate(&self) -> usize {
        let connections = self.registry.drain();
        for mut conn in connections.iter().cloned() {
            conn.state = ConnectionState::Hibernated;
            self.persist_or_warn(&conn);
        }
        debug!(count = connections.len(), "Hibernated");
        connections.len()
    }

    fn forget(&self, socket: &SocketId) -> Option<Connection> {
        let removed = self.registry.unregister_socket(socket);
        self.host.release(socket);
        removed
    }

    fn reject(&self, socket: &dyn Socket, err: &HubError) {
        let reason = match err {
            HubError::SocketClosed(_) => "socket closed",
            HubError::DuplicateConnection { .. } => "duplicate connection",
            _ => "attachment unavailable",
        };
        socket.close(close_code::INTERNAL_ERROR, reason);
        self.registry.unregister_socket(socket.id());
        self.host.release(socket.id());
    }

    fn persist_or_warn(&self, conn: &Connection) {
        if let Err(e) = self.persist(conn) {
            warn!(connection = %conn.id, error = %e, "Failed to persist attachment");
        }
    }
}

/// Close code to use when a send to a connection fails.
#[must_use]
pub fn close_code_for(err: &TransportError) -> u16 {
    match err {
        TransportError::Backpressure(_) => close_code::POLICY_VIOLATION,
        TransportError::ConnectionClosed => close_code::ABNORMAL,
        _ => close_code::INTERNAL_ERROR,
    }
}
