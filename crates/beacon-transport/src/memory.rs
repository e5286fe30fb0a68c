//! In-process sockets.
//!
//! [`MemorySocket`] behaves like an accepted WebSocket with a bounded outbound
//! queue; the paired [`MemoryPeer`] is the far end a dashboard would hold.
//! Used by tests, benchmarks, and internal producers that want to observe the
//! broadcast stream without a network hop.

use beacon_protocol::{codec, Envelope};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::traits::{Socket, SocketId, TransportError};

#[derive(Debug)]
struct Shared {
    open: AtomicBool,
    close_frame: OnceLock<(u16, String)>,
}

/// Server half of an in-process socket.
#[derive(Debug)]
pub struct MemorySocket {
    id: SocketId,
    tx: mpsc::Sender<Bytes>,
    capacity: usize,
    shared: Arc<Shared>,
}

/// Client half of an in-process socket.
#[derive(Debug)]
pub struct MemoryPeer {
    rx: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
}

impl MemorySocket {
    /// Create a connected socket/peer pair with the given outbound queue bound.
    #[must_use]
    pub fn pair(capacity: usize) -> (Arc<Self>, MemoryPeer) {
        Self::pair_with_id(SocketId::generate(), capacity)
    }

    /// Create a pair with a fixed socket identity.
    #[must_use]
    pub fn pair_with_id(id: impl Into<SocketId>, capacity: usize) -> (Arc<Self>, MemoryPeer) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            close_frame: OnceLock::new(),
        });

        let socket = Arc::new(Self {
            id: id.into(),
            tx,
            capacity,
            shared: Arc::clone(&shared),
        });
        (socket, MemoryPeer { rx, shared })
    }
}

impl Socket for MemorySocket {
    fn id(&self) -> &SocketId {
        &self.id
    }

    fn try_send(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure(self.capacity),
            TrySendError::Closed(_) => {
                self.shared.open.store(false, Ordering::SeqCst);
                TransportError::ConnectionClosed
            }
        })
    }

    fn close(&self, code: u16, reason: &str) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            let _ = self.shared.close_frame.set((code, reason.to_string()));
        }
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

impl MemoryPeer {
    /// Take the next queued frame without waiting.
    ///
    /// Frames still queued when the server closed the socket are discarded.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        if self.closed_by_server() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Wait for the next frame.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.closed_by_server() {
            return None;
        }
        self.rx.recv().await
    }

    /// Drain every queued frame and decode it.
    ///
    /// Frames that do not decode are skipped with a warning.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(frame) = self.try_recv() {
            match codec::decode(&frame) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => warn!(error = %e, "Peer received undecodable frame"),
            }
        }
        envelopes
    }

    /// Drop the connection from the client side.
    pub fn disconnect(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    /// Check if the socket is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Close code and reason sent by the server, if it closed the socket.
    #[must_use]
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.shared.close_frame.get().cloned()
    }

    fn closed_by_server(&self) -> bool {
        self.shared.close_frame.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::close_code;

    #[test]
    fn test_frames_keep_queue_order() {
        let (socket, mut peer) = MemorySocket::pair(8);
        socket.try_send(Bytes::from_static(b"{\"type\":\"a\"}")).unwrap();
        socket.try_send(Bytes::from_static(b"{\"type\":\"b\"}")).unwrap();

        let kinds: Vec<_> = peer.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["a", "b"]);
    }

    #[test]
    fn test_backpressure_when_full() {
        let (socket, _peer) = MemorySocket::pair(1);
        socket.try_send(Bytes::from_static(b"1")).unwrap();
        assert!(matches!(
            socket.try_send(Bytes::from_static(b"2")),
            Err(TransportError::Backpressure(1))
        ));
    }

    #[test]
    fn test_close_cancels_pending_sends() {
        let (socket, mut peer) = MemorySocket::pair(4);
        socket.try_send(Bytes::from_static(b"{\"type\":\"ping\"}")).unwrap();
        socket.close(close_code::GOING_AWAY, "keepalive timeout");

        assert!(!socket.is_open());
        assert!(peer.try_recv().is_none());
        assert!(matches!(
            socket.try_send(Bytes::from_static(b"x")),
            Err(TransportError::ConnectionClosed)
        ));
        assert_eq!(
            peer.close_frame(),
            Some((close_code::GOING_AWAY, "keepalive timeout".to_string()))
        );
    }

    #[test]
    fn test_peer_disconnect() {
        let (socket, peer) = MemorySocket::pair(4);
        peer.disconnect();
        assert!(!socket.is_open());
        assert!(peer.close_frame().is_none());
    }

    #[tokio::test]
    async fn test_dropped_peer_closes_socket() {
        let (socket, peer) = MemorySocket::pair(4);
        drop(peer);
        assert!(matches!(
            socket.try_send(Bytes::from_static(b"x")),
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!socket.is_open());
    }
}
