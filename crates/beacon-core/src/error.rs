//! Hub errors.

use beacon_protocol::ProtocolError;
use beacon_transport::{SocketId, TransportError};
use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors raised by the hub.
///
/// None of these are fatal to the hub as a whole; each one concerns a single
/// socket or a single trigger call.
#[derive(Debug, Error)]
pub enum HubError {
    /// The socket has no attachment record to restore from.
    #[error("No attachment record for socket {0}")]
    MissingAttachment(SocketId),

    /// The attachment record could not be decoded.
    #[error("Corrupt attachment record for socket {socket}: {reason}")]
    CorruptAttachment {
        /// Socket whose record is unreadable.
        socket: SocketId,
        /// Decoder message.
        reason: String,
    },

    /// The attachment record could not be encoded.
    #[error("Failed to encode attachment record: {0}")]
    AttachmentEncode(#[from] rmp_serde::encode::Error),

    /// A connection ID is already registered for a different socket.
    #[error("Connection {id} is already held by socket {held_by}")]
    DuplicateConnection {
        /// The contested ID.
        id: ConnectionId,
        /// Socket that owns the registered entry.
        held_by: SocketId,
    },

    /// The socket is already closed at the platform level.
    #[error("Socket {0} is closed")]
    SocketClosed(SocketId),

    /// Wire protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
