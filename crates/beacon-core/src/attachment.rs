//! Attachment records.
//!
//! An attachment record is everything needed to rebuild a registry entry for
//! an open socket without any other process memory. Records are MessagePack
//! encoded and stored on the socket host next to the socket itself.

use beacon_transport::{Socket, SocketId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::error::HubError;
use crate::keepalive::KeepaliveEntry;

/// Persisted per-socket state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Connection identity.
    pub connection_id: ConnectionId,
    /// Client-provided tag.
    pub tag: Option<String>,
    /// State at the time of the last write.
    pub state: ConnectionState,
    /// When the socket was first attached (Unix ms).
    pub attached_at: u64,
    /// Last inbound frame (Unix ms).
    pub last_seen: u64,
    /// Keepalive bookkeeping.
    #[serde(default)]
    pub keepalive: KeepaliveEntry,
}

impl AttachmentRecord {
    /// Snapshot a connection.
    #[must_use]
    pub fn of(conn: &Connection) -> Self {
        Self {
            connection_id: conn.id.clone(),
            tag: conn.tag.clone(),
            state: conn.state,
            attached_at: conn.attached_at,
            last_seen: conn.last_seen,
            keepalive: conn.keepalive,
        }
    }

    /// Encode for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if MessagePack encoding fails.
    pub fn encode(&self) -> Result<Bytes, HubError> {
        let bytes = rmp_serde::to_vec_named(self)?;
        Ok(Bytes::from(bytes))
    }

    /// Decode a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::CorruptAttachment`] if the bytes are not a record.
    pub fn decode(socket: &SocketId, data: &[u8]) -> Result<Self, HubError> {
        rmp_serde::from_slice(data).map_err(|e| HubError::CorruptAttachment {
            socket: socket.clone(),
            reason: e.to_string(),
        })
    }

    /// Rebuild the registry entry for `socket` from this record.
    ///
    /// The rebuilt connection is always `Active`.
    #[must_use]
    pub fn into_connection(self, socket: Arc<dyn Socket>) -> Connection {
        Connection {
            id: self.connection_id,
            socket,
            state: ConnectionState::Active,
            tag: self.tag,
            attached_at: self.attached_at,
            last_seen: self.last_seen,
            keepalive: self.keepalive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::MemorySocket;

    #[test]
    fn test_record_rebuilds_connection() {
        let (socket, _peer) = MemorySocket::pair(4);
        let mut conn = Connection::new(socket.clone(), Some("admin".into()), 100);
        conn.last_seen = 250;
        conn.state = ConnectionState::Hibernated;

        let encoded = AttachmentRecord::of(&conn).encode().unwrap();
        let record = AttachmentRecord::decode(socket.id(), &encoded).unwrap();
        let rebuilt = record.into_connection(socket);

        assert_eq!(rebuilt.id, conn.id);
        assert_eq!(rebuilt.tag.as_deref(), Some("admin"));
        assert_eq!(rebuilt.last_seen, 250);
        assert_eq!(rebuilt.attached_at, 100);
        assert_eq!(rebuilt.state, ConnectionState::Active);
    }

    #[test]
    fn test_corrupt_record() {
        let id = SocketId::new("sock-1");
        match AttachmentRecord::decode(&id, b"\xc1garbage") {
            Err(HubError::CorruptAttachment { socket, .. }) => assert_eq!(socket, id),
            other => panic!("Expected CorruptAttachment, got {:?}", other),
        }
    }
}
