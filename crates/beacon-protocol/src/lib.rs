//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon broadcast hub.
//!
//! Dashboards and the hub exchange one JSON object per WebSocket text frame:
//!
//! - `{"type":"ping"}` / `{"type":"pong"}` - keepalive
//! - `{"type":"hello","data":{...}}` - a broadcast event
//! - `{"type":"message","data":{...}}` - a client event relayed to everyone
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Envelope};
//! use serde_json::json;
//!
//! let envelope = Envelope::hello(json!({"status": "tmp inserted", "id": "42"}));
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Envelope, FrameType};
