//! Socket abstraction traits for Beacon.
//!
//! A [`Socket`] is the platform's handle to one accepted WebSocket. It outlives
//! any in-memory hub state: the hub may be torn down and rebuilt while the
//! socket stays open.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// WebSocket close codes used by the hub.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away (keepalive expiry, shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Peer closed without sending a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Policy violation (outbound queue overflow).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Server cannot continue serving this socket.
    pub const INTERNAL_ERROR: u16 = 1011;
}

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Native identity of a socket, assigned by the platform at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub String);

impl SocketId {
    /// Create a socket ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh socket ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("ws_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SocketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SocketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound queue is full.
    #[error("Outbound queue full ({0} frames pending)")]
    Backpressure(usize),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The platform has no record of this socket.
    #[error("Unknown socket: {0}")]
    UnknownSocket(SocketId),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] beacon_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// An accepted socket.
///
/// Sends never wait: each socket owns a bounded FIFO outbound queue, so frames
/// queued on one socket keep the order they were queued in, and a stalled peer
/// only ever fills its own queue.
pub trait Socket: Send + Sync {
    /// Native identity of this socket.
    fn id(&self) -> &SocketId;

    /// Queue an encoded text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Backpressure`] when the outbound queue is
    /// full and [`TransportError::ConnectionClosed`] once the socket is closed.
    fn try_send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the socket. Frames still queued are discarded.
    fn close(&self, code: u16, reason: &str);

    /// Check if the socket is still open.
    fn is_open(&self) -> bool;

    /// Remote address of the peer, if known.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_id_generation() {
        let id1 = SocketId::generate();
        let id2 = SocketId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("ws_"));
    }

    #[test]
    fn test_socket_id_from_string() {
        let id: SocketId = "sock-1".into();
        assert_eq!(id.as_str(), "sock-1");
        assert_eq!(id.to_string(), "sock-1");
    }
}
