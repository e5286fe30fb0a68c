//! # beacon-transport
//!
//! The platform side of Beacon's hibernatable sockets.
//!
//! - [`Socket`] - an accepted socket with a bounded, non-blocking outbound queue
//! - [`SocketHost`] - the platform's own record of open sockets, holding one
//!   attachment blob per socket that survives hub restarts
//! - [`websocket`] - axum-backed sockets for the server
//! - [`memory`] - in-process sockets for tests and internal producers
//! - `client` - a reconnecting dashboard client (feature `client`)
//!
//! ```rust,ignore
//! use beacon_transport::{websocket, SocketHost};
//!
//! let (socket, mut inbound) = websocket::split(ws, &config, Some(addr));
//! host.adopt(socket.clone(), record);
//! while let Some(Ok(frame)) = inbound.next().await {
//!     // hand the frame to the hub
//! }
//! ```

pub mod host;
pub mod memory;
pub mod traits;
pub mod websocket;

#[cfg(feature = "client")]
pub mod client;

pub use host::{MemorySocketHost, SocketHost};
pub use memory::{MemoryPeer, MemorySocket};
pub use traits::{close_code, Socket, SocketId, TransportError};

#[cfg(feature = "client")]
pub use client::{ClientState, DashboardClient, ReconnectMachine, ReconnectPolicy};
