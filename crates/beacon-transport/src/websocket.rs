//! WebSocket transport built on axum's upgraded sockets.
//!
//! [`split`] turns an upgraded [`WebSocket`] into a [`Socket`] for the hub and
//! an [`Inbound`] stream for the connection task. Outbound frames go through a
//! bounded queue drained by a dedicated writer task, so a slow client never
//! blocks the caller of [`Socket::try_send`].

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::traits::{close_code, Socket, SocketId, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum frames queued per socket before sends report back-pressure.
    pub outbound_queue: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self { outbound_queue: 64 }
    }
}

/// Frame read from a client.
#[derive(Debug)]
pub enum InboundFrame {
    /// Text or binary payload.
    Data(Bytes),
    /// Client closed the socket.
    Close {
        /// Close code (1006 when the client sent no close frame).
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Server half of an upgraded WebSocket.
pub struct WebSocketSocket {
    id: SocketId,
    tx: mpsc::Sender<Bytes>,
    close_tx: watch::Sender<Option<(u16, String)>>,
    open: Arc<AtomicBool>,
    capacity: usize,
    remote_addr: Option<SocketAddr>,
}

/// Read half of an upgraded WebSocket.
pub struct Inbound {
    id: SocketId,
    stream: SplitStream<WebSocket>,
    open: Arc<AtomicBool>,
}

/// Split an upgraded WebSocket and start its writer task.
#[must_use]
pub fn split(
    socket: WebSocket,
    config: &WebSocketConfig,
    remote_addr: Option<SocketAddr>,
) -> (Arc<WebSocketSocket>, Inbound) {
    let id = SocketId::generate();
    let capacity = config.outbound_queue.max(1);
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(capacity);
    let (close_tx, close_rx) = watch::channel(None);
    let open = Arc::new(AtomicBool::new(true));

    tokio::spawn(write_loop(
        id.clone(),
        sink,
        rx,
        close_rx,
        Arc::clone(&open),
    ));

    let socket = Arc::new(WebSocketSocket {
        id: id.clone(),
        tx,
        close_tx,
        open: Arc::clone(&open),
        capacity,
        remote_addr,
    });
    (socket, Inbound { id, stream, open })
}

async fn write_loop(
    id: SocketId,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
    mut close_rx: watch::Receiver<Option<(u16, String)>>,
    open: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = close_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let close = close_rx.borrow_and_update().clone();
                if let Some((code, reason)) = close {
                    let frame = CloseFrame { code, reason: reason.into() };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        trace!(socket = %id, error = %e, "Close frame not delivered");
                    }
                    break;
                }
            }

            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match std::str::from_utf8(&frame) {
                    Ok(text) => text.to_owned(),
                    Err(_) => {
                        warn!(socket = %id, "Dropping non UTF-8 outbound frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(socket = %id, error = %e, "WebSocket write failed");
                    break;
                }
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    trace!(socket = %id, "Writer task finished");
}

impl WebSocketSocket {
    /// Outbound queue bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Socket for WebSocketSocket {
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
                self.open.store(false, Ordering::SeqCst);
                TransportError::ConnectionClosed
            }
        })
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(socket = %self.id, code, reason, "Closing WebSocket");
            let _ = self.close_tx.send(Some((code, reason.to_string())));
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

impl Inbound {
    /// Native identity of the socket this stream belongs to.
    #[must_use]
    pub fn id(&self) -> &SocketId {
        &self.id
    }

    /// Read the next client frame.
    ///
    /// Control frames are answered by the WebSocket layer and skipped here.
    /// Returns `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(msg) => msg,
                None => {
                    self.open.store(false, Ordering::SeqCst);
                    return None;
                }
            };

            match msg {
                Ok(Message::Text(text)) => return Some(Ok(InboundFrame::Data(Bytes::from(text)))),
                Ok(Message::Binary(data)) => return Some(Ok(InboundFrame::Data(Bytes::from(data)))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(frame)) => {
                    self.open.store(false, Ordering::SeqCst);
                    let (code, reason) = frame
                        .map(|f| (f.code, f.reason.into_owned()))
                        .unwrap_or((close_code::ABNORMAL, String::new()));
                    return Some(Ok(InboundFrame::Close { code, reason }));
                }
                Err(e) => {
                    self.open.store(false, Ordering::SeqCst);
                    return Some(Err(TransportError::ReceiveFailed(e.to_string())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.outbound_queue, 64);
    }
}
