//! The platform's own record of accepted sockets.
//!
//! A [`SocketHost`] plays the part of the edge runtime: it keeps every
//! accepted socket and a small opaque attachment blob per socket, independent
//! of any hub instance. A hub that is dropped and rebuilt can list the open
//! sockets here and read back each socket's attachment.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::traits::{Socket, SocketId, TransportError};

/// Platform-side socket registry with per-socket attachment storage.
pub trait SocketHost: Send + Sync {
    /// Take ownership of a newly accepted socket together with its first
    /// attachment blob.
    ///
    /// The socket becomes visible to [`SocketHost::sockets`] only with its
    /// attachment in place. Adopting a socket the host already holds replaces
    /// its attachment.
    fn adopt(&self, socket: Arc<dyn Socket>, attachment: Bytes);

    /// All sockets that are still open, in no particular order.
    fn sockets(&self) -> Vec<Arc<dyn Socket>>;

    /// Look up a socket by its native identity.
    fn socket(&self, id: &SocketId) -> Option<Arc<dyn Socket>>;

    /// Store the attachment blob for a socket, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownSocket`] if the socket was never adopted
    /// or has been released.
    fn serialize_attachment(&self, id: &SocketId, attachment: Bytes)
        -> Result<(), TransportError>;

    /// Read back the attachment blob for a socket.
    fn deserialize_attachment(&self, id: &SocketId) -> Option<Bytes>;

    /// Forget a socket and its attachment.
    fn release(&self, id: &SocketId);
}

struct HostedSocket {
    socket: Arc<dyn Socket>,
    attachment: Bytes,
}

/// In-process [`SocketHost`] backed by a concurrent map.
///
/// Closed sockets are purged lazily whenever [`SocketHost::sockets`] runs.
#[derive(Default)]
pub struct MemorySocketHost {
    sockets: DashMap<SocketId, HostedSocket>,
}

impl MemorySocketHost {
    /// Create an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sockets the host still holds, open or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Check if the host holds no sockets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

impl SocketHost for MemorySocketHost {
    fn adopt(&self, socket: Arc<dyn Socket>, attachment: Bytes) {
        let id = socket.id().clone();
        debug!(socket = %id, "Socket adopted by host");
        self.sockets.insert(id, HostedSocket { socket, attachment });
    }

    fn sockets(&self) -> Vec<Arc<dyn Socket>> {
        self.sockets.retain(|id, hosted| {
            let open = hosted.socket.is_open();
            if !open {
                trace!(socket = %id, "Host purged closed socket");
            }
            open
        });
        self.sockets
            .iter()
            .map(|entry| Arc::clone(&entry.socket))
            .collect()
    }

    fn socket(&self, id: &SocketId) -> Option<Arc<dyn Socket>> {
        self.sockets.get(id).map(|entry| Arc::clone(&entry.socket))
    }

    fn serialize_attachment(
        &self,
        id: &SocketId,
        attachment: Bytes,
    ) -> Result<(), TransportError> {
        match self.sockets.get_mut(id) {
            Some(mut entry) => {
                entry.attachment = attachment;
                Ok(())
            }
            None => Err(TransportError::UnknownSocket(id.clone())),
        }
    }

    fn deserialize_attachment(&self, id: &SocketId) -> Option<Bytes> {
        self.sockets
            .get(id)
            .map(|entry| entry.attachment.clone())
    }

    fn release(&self, id: &SocketId) {
        if self.sockets.remove(id).is_some() {
            debug!(socket = %id, "Socket released by host");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySocket;

    #[test]
    fn test_attachment_storage() {
        let host = MemorySocketHost::new();
        let (socket, _peer) = MemorySocket::pair(4);
        let id = socket.id().clone();
        host.adopt(socket, Bytes::from_static(b"first"));

        assert_eq!(
            host.deserialize_attachment(&id).as_deref(),
            Some(&b"first"[..])
        );
        host.serialize_attachment(&id, Bytes::from_static(b"record"))
            .unwrap();
        assert_eq!(
            host.deserialize_attachment(&id).as_deref(),
            Some(&b"record"[..])
        );
    }

    #[test]
    fn test_attachment_for_unknown_socket() {
        let host = MemorySocketHost::new();
        let err = host
            .serialize_attachment(&SocketId::new("nope"), Bytes::new())
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownSocket(_)));
    }

    #[test]
    fn test_adopted_socket_is_listed_with_attachment() {
        let host = MemorySocketHost::new();
        let (socket, _peer) = MemorySocket::pair(4);
        host.adopt(socket.clone(), Bytes::from_static(b"record"));

        for listed in host.sockets() {
            assert!(host.deserialize_attachment(listed.id()).is_some());
        }

        host.adopt(socket.clone(), Bytes::from_static(b"newer"));
        assert_eq!(host.len(), 1);
        assert_eq!(
            host.deserialize_attachment(socket.id()).as_deref(),
            Some(&b"newer"[..])
        );
    }

    #[test]
    fn test_sockets_skips_closed() {
        let host = MemorySocketHost::new();
        let (a, _peer_a) = MemorySocket::pair(4);
        let (b, peer_b) = MemorySocket::pair(4);
        host.adopt(a.clone(), Bytes::new());
        host.adopt(b, Bytes::new());

        peer_b.disconnect();

        let open = host.sockets();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id(), a.id());
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let host = MemorySocketHost::new();
        let (socket, _peer) = MemorySocket::pair(4);
        let id = socket.id().clone();
        host.adopt(socket, Bytes::new());

        host.release(&id);
        host.release(&id);
        assert!(host.is_empty());
        assert!(host.socket(&id).is_none());
    }
}
