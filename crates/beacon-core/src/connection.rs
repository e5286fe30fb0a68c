//! Connection entries held by the registry.

use beacon_transport::{Socket, SocketId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::keepalive::KeepaliveEntry;

/// Maximum attachment tag length in bytes.
pub const MAX_TAG_LENGTH: usize = 256;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hub-assigned connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        // Timestamp keeps IDs from earlier processes distinct; counter keeps
        // IDs within this process distinct.
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Attachment state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered with a live hub.
    Active,
    /// The hub that owned it went away; the socket is still open.
    Hibernated,
    /// Removed from the registry.
    Closed,
}

/// A registered connection.
///
/// Cloning is cheap; clones share the underlying socket.
#[derive(Clone)]
pub struct Connection {
    /// Hub-assigned identifier.
    pub id: ConnectionId,
    /// The platform socket.
    pub socket: Arc<dyn Socket>,
    /// Attachment state.
    pub state: ConnectionState,
    /// Small client-provided tag, e.g. the dashboard role.
    pub tag: Option<String>,
    /// When the socket was first attached.
    pub attached_at: u64,
    /// Last inbound frame of any kind.
    pub last_seen: u64,
    /// Keepalive bookkeeping.
    pub keepalive: KeepaliveEntry,
}

impl Connection {
    /// Create a fresh, active connection for a newly accepted socket.
    #[must_use]
    pub fn new(socket: Arc<dyn Socket>, tag: Option<String>, now: u64) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            state: ConnectionState::Active,
            tag,
            attached_at: now,
            last_seen: now,
            keepalive: KeepaliveEntry::default(),
        }
    }

    /// Native identity of the underlying socket.
    #[must_use]
    pub fn socket_id(&self) -> &SocketId {
        self.socket.id()
    }

    /// Check if the underlying socket is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("socket", self.socket.id())
            .field("state", &self.state)
            .field("tag", &self.tag)
            .field("attached_at", &self.attached_at)
            .field("last_seen", &self.last_seen)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}
