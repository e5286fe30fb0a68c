//! Connection registry.
//!
//! The registry is the only shared mutable structure in the hub. All
//! mutation goes through one `RwLock`; every operation is O(1) apart from
//! snapshots, so contention stays low. Insertion order is kept for
//! [`Registry::most_recent`].

use beacon_transport::SocketId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::error::HubError;

struct Entry {
    conn: Connection,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ConnectionId, Entry>,
    by_socket: HashMap<SocketId, ConnectionId>,
    order: BTreeMap<u64, ConnectionId>,
    next_seq: u64,
}

/// Registry of live connections.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

/// A point-in-time copy of the registry contents.
///
/// Iterating a snapshot never observes later additions or removals, and the
/// same snapshot can be iterated any number of times.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    connections: Vec<Connection>,
}

impl Snapshot {
    /// Iterate the snapshot.
    pub fn iter(&self) -> std::slice::Iter<'_, Connection> {
        self.connections.iter()
    }

    /// Number of connections captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl IntoIterator for Snapshot {
    type Item = Connection;
    type IntoIter = std::vec::IntoIter<Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.into_iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Connection;
    type IntoIter = std::slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.iter()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection and make it visible to broadcast.
    ///
    /// A socket is registered at most once: registering a connection for a
    /// socket that already has an entry keeps the existing entry and returns
    /// its ID.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateConnection`] if the ID is already held by
    /// a different socket.
    pub fn register(&self, conn: Connection) -> Result<ConnectionId, HubError> {
        let mut inner = self.write();

        if let Some(existing) = inner.by_socket.get(conn.socket_id()) {
            trace!(connection = %existing, "Socket already registered");
            return Ok(existing.clone());
        }
        if let Some(held) = inner.entries.get(&conn.id) {
            return Err(HubError::DuplicateConnection {
                id: conn.id.clone(),
                held_by: held.conn.socket_id().clone(),
            });
        }

        let id = conn.id.clone();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_socket.insert(conn.socket_id().clone(), id.clone());
        inner.order.insert(seq, id.clone());
        inner.entries.insert(id.clone(), Entry { conn, seq });

        debug!(connection = %id, total = inner.entries.len(), "Registered");
        Ok(id)
    }

    /// Remove a connection. Unknown IDs are ignored.
    ///
    /// Returns the removed connection, marked `Closed`.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Connection> {
        let mut inner = self.write();
        let entry = inner.entries.remove(id)?;
        inner.order.remove(&entry.seq);
        inner.by_socket.remove(entry.conn.socket_id());

        debug!(connection = %id, total = inner.entries.len(), "Unregistered");
        let mut conn = entry.conn;
        conn.state = ConnectionState::Closed;
        Some(conn)
    }

    /// Remove the connection bound to a socket. Unknown sockets are ignored.
    pub fn unregister_socket(&self, socket: &SocketId) -> Option<Connection> {
        let id = self.read().by_socket.get(socket).cloned()?;
        self.unregister(&id)
    }

    /// Look up a connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.read().entries.get(id).map(|e| e.conn.clone())
    }

    /// Look up the connection bound to a socket.
    #[must_use]
    pub fn get_by_socket(&self, socket: &SocketId) -> Option<Connection> {
        let inner = self.read();
        let id = inner.by_socket.get(socket)?;
        inner.entries.get(id).map(|e| e.conn.clone())
    }

    /// Apply `f` to a registered connection and return the updated copy.
    pub fn update<F>(&self, id: &ConnectionId, f: F) -> Option<Connection>
    where
        F: FnOnce(&mut Connection),
    {
        let mut inner = self.write();
        let entry = inner.entries.get_mut(id)?;
        f(&mut entry.conn);
        Some(entry.conn.clone())
    }

    /// Capture the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.read();
        let connections = inner
            .order
            .values()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.conn.clone())
            .collect();
        Snapshot { connections }
    }

    /// Visit every connection present when the call starts.
    ///
    /// The lock is released before the first visit, so `visit` may freely
    /// register or unregister connections.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Connection),
    {
        for conn in &self.snapshot() {
            visit(conn);
        }
    }

    /// The most recently registered connection still present.
    #[must_use]
    pub fn most_recent(&self) -> Option<Connection> {
        let inner = self.read();
        let (_, id) = inner.order.iter().next_back()?;
        inner.entries.get(id).map(|e| e.conn.clone())
    }

    /// Registered IDs in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().order.values().cloned().collect()
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.read().entries.contains_key(id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Remove every connection, returning them in insertion order.
    pub fn drain(&self) -> Vec<Connection> {
        let mut inner = self.write();
        let order = std::mem::take(&mut inner.order);
        inner.by_socket.clear();
        let mut entries = std::mem::take(&mut inner.entries);
        order
            .into_values()
            .filter_map(|id| entries.remove(&id))
            .map(|e| e.conn)
            .collect()
    }
}
