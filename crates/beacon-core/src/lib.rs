//! # beacon-core
//!
//! Connection registry, hibernation and broadcast routing for the Beacon hub.
//!
//! - **Registry** - the set of live dashboard connections
//! - **Hibernation** - rebuilds the registry from per-socket attachment records
//! - **Keepalive** - answers pings and evicts silent connections
//! - **Router** - fans a trigger out to every connection as `hello`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  trigger  ┌──────────────┐  try_send  ┌──────────────┐
//! │   Producer   │──────────▶│    Router    │───────────▶│   Sockets    │
//! └──────────────┘           └──────────────┘            └──────────────┘
//!                                   │                           ▲
//!                                   ▼                           │
//!                            ┌──────────────┐  attachments ┌──────────────┐
//!                            │   Registry   │◀─────────────│  SocketHost  │
//!                            └──────────────┘   (restore)  └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use beacon_core::Hub;
//! use beacon_transport::{MemorySocket, MemorySocketHost};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let hub = Hub::new(Arc::new(MemorySocketHost::new()));
//! let (socket, mut dashboard) = MemorySocket::pair(16);
//! hub.attach(socket, None).unwrap();
//!
//! let report = hub.broadcast(json!({"status": "tmp inserted"})).unwrap();
//! assert_eq!(report.delivered, 1);
//! assert_eq!(dashboard.drain().len(), 1);
//! ```

pub mod attachment;
pub mod clock;
pub mod connection;
pub mod error;
pub mod hibernation;
pub mod hub;
pub mod keepalive;
pub mod registry;
pub mod router;

pub use attachment::AttachmentRecord;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::HubError;
pub use hibernation::{Dispatch, HibernationAdapter, WakeReport};
pub use hub::{Hub, HubConfig, HubStats};
pub use keepalive::{KeepaliveConfig, KeepaliveEntry, KeepaliveMonitor};
pub use registry::{Registry, Snapshot};
pub use router::{BroadcastReport, BroadcastRouter};
