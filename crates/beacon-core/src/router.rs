//! Broadcast fan-out.
//!
//! A trigger is wrapped in a `hello` envelope, encoded once, and queued on
//! every registered socket. Per-socket failures never fail the trigger: the
//! failing connection is evicted and the fan-out moves on.

use beacon_protocol::{codec, Envelope};
use beacon_transport::{close_code, TransportError};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::hibernation::{close_code_for, HibernationAdapter};

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sockets the frame was queued on.
    pub delivered: usize,
    /// Connections evicted during the fan-out.
    pub dropped: usize,
}

/// Fans broadcast frames out to every registered connection.
pub struct BroadcastRouter {
    adapter: Arc<HibernationAdapter>,
}

impl BroadcastRouter {
    /// Create a router over the adapter's registry.
    #[must_use]
    pub fn new(adapter: Arc<HibernationAdapter>) -> Self {
        Self { adapter }
    }

    /// Broadcast a trigger payload as a `hello` frame.
    ///
    /// # Errors
    ///
    /// Returns an error only if the envelope cannot be encoded.
    pub fn trigger(&self, data: Value) -> Result<BroadcastReport, HubError> {
        self.send(&Envelope::hello(data))
    }

    /// Broadcast an arbitrary envelope.
    ///
    /// # Errors
    ///
    /// Returns an error only if the envelope cannot be encoded.
    pub fn send(&self, envelope: &Envelope) -> Result<BroadcastReport, HubError> {
        let frame = codec::encode(envelope)?;
        Ok(self.fan_out(frame))
    }

    /// Queue an encoded frame on every registered socket.
    ///
    /// Iterates a snapshot, so connections attached during the fan-out are
    /// not visited and the registry lock is never held across a send.
    pub fn fan_out(&self, frame: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.adapter.registry().for_each(|conn| {
            if !conn.is_open() {
                self.adapter
                    .evict(conn, close_code::ABNORMAL, "socket closed");
                report.dropped += 1;
                return;
            }

            match conn.socket.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    match &e {
                        TransportError::Backpressure(depth) => {
                            warn!(connection = %conn.id, depth, "Outbound queue full; dropping connection");
                        }
                        _ => warn!(connection = %conn.id, error = %e, "Send failed; dropping connection"),
                    }
                    self.adapter.evict(conn, close_code_for(&e), "send failed");
                    report.dropped += 1;
                }
            }
        });

        debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            bytes = frame.len(),
            "Fan-out complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::KeepaliveMonitor;
    use crate::registry::Registry;
    use beacon_protocol::FrameType;
    use beacon_transport::{MemorySocket, MemorySocketHost};
    use serde_json::json;

    fn router() -> (BroadcastRouter, Arc<HibernationAdapter>) {
        let adapter = Arc::new(HibernationAdapter::new(
            Arc::new(MemorySocketHost::new()),
            Arc::new(Registry::new()),
            KeepaliveMonitor::default(),
        ));
        (BroadcastRouter::new(adapter.clone()), adapter)
    }

    #[test]
    fn test_trigger_reaches_every_connection() {
        let (router, adapter) = router();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (socket, peer) = MemorySocket::pair(4);
            adapter.on_attach(socket, None, 0).unwrap();
            peers.push(peer);
        }

        let report = router.trigger(json!({"status": "tmp inserted"})).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 3, dropped: 0 });

        for peer in &mut peers {
            let frames = peer.drain();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].frame_type(), FrameType::Hello);
            assert_eq!(frames[0].data, Some(json!({"status": "tmp inserted"})));
        }
    }

    #[test]
    fn test_empty_registry() {
        let (router, _adapter) = router();
        let report = router.trigger(json!({})).unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn test_full_queue_evicts_only_that_connection() {
        let (router, adapter) = router();
        let (slow, slow_peer) = MemorySocket::pair(1);
        let (fast, mut fast_peer) = MemorySocket::pair(8);
        adapter.on_attach(slow.clone(), None, 0).unwrap();
        adapter.on_attach(fast, None, 0).unwrap();

        router.trigger(json!(1)).unwrap();
        let report = router.trigger(json!(2)).unwrap();

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(
            slow_peer.close_frame().map(|(code, _)| code),
            Some(close_code::POLICY_VIOLATION)
        );
        assert_eq!(adapter.registry().len(), 1);
        assert_eq!(fast_peer.drain().len(), 2);
    }

    #[test]
    fn test_closed_socket_is_evicted() {
        let (router, adapter) = router();
        let (gone, gone_peer) = MemorySocket::pair(4);
        let (live, mut live_peer) = MemorySocket::pair(4);
        adapter.on_attach(gone, None, 0).unwrap();
        adapter.on_attach(live, None, 0).unwrap();
        gone_peer.disconnect();

        let report = router.trigger(json!({"ic": "0042"})).unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(adapter.registry().len(), 1);
        assert_eq!(live_peer.drain().len(), 1);
    }
}
