//! Reconnecting dashboard client.
//!
//! [`ReconnectMachine`] is the reconnect/backoff state machine every dashboard
//! runs: `Connecting -> Open -> Reconnecting(attempt) -> Closed`, doubling the
//! delay on each attempt and giving up after a bounded number of attempts.
//! [`DashboardClient`] drives it over a real WebSocket.

use beacon_protocol::{codec, Envelope, FrameType};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::traits::TransportError;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default client keepalive cadence.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Dialing the hub.
    Connecting,
    /// Socket is open.
    Open,
    /// Waiting to redial; `attempt` starts at 1.
    Reconnecting {
        /// Attempt number.
        attempt: u32,
    },
    /// Gave up, or shut down.
    Closed,
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before attempt 1; doubled for each following attempt.
    pub base_delay: Duration,
    /// Attempts allowed before the client closes for good.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Pure reconnect state machine.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ClientState,
    attempts: u32,
}

impl ReconnectMachine {
    /// Start in `Connecting`.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ClientState::Connecting,
            attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The socket opened; the attempt counter resets.
    pub fn on_open(&mut self) {
        if self.state != ClientState::Closed {
            self.state = ClientState::Open;
            self.attempts = 0;
        }
    }

    /// The socket closed or failed to open.
    ///
    /// Returns the delay before redialing, or `None` once attempts are spent.
    pub fn on_close(&mut self) -> Option<Duration> {
        if self.state == ClientState::Closed {
            return None;
        }
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.state = ClientState::Reconnecting {
                attempt: self.attempts,
            };
            Some(self.policy.delay_for(self.attempts))
        } else {
            self.state = ClientState::Closed;
            None
        }
    }

    /// The backoff delay elapsed and the client is redialing.
    pub fn on_redial(&mut self) {
        if let ClientState::Reconnecting { .. } = self.state {
            self.state = ClientState::Connecting;
        }
    }

    /// Stop for good.
    pub fn shutdown(&mut self) {
        self.state = ClientState::Closed;
    }
}

/// A dashboard connection that pings the hub and follows the reconnect policy.
#[derive(Debug, Clone)]
pub struct DashboardClient {
    url: String,
    policy: ReconnectPolicy,
    ping_interval: Duration,
}

impl DashboardClient {
    /// Create a client for the given `ws://` or `wss://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    /// Override the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the keepalive cadence.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Run until reconnect attempts are exhausted, calling `on_hello` with the
    /// `data` of every `hello` broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the client gives up.
    pub async fn run<F>(self, mut on_hello: F) -> Result<(), TransportError>
    where
        F: FnMut(Value),
    {
        let mut machine = ReconnectMachine::new(self.policy);

        loop {
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "Dashboard connected");
                    machine.on_open();
                    self.session(ws, &mut on_hello).await;
                    debug!(url = %self.url, "Dashboard disconnected");
                }
                Err(e) => warn!(url = %self.url, error = %e, "Dashboard connect failed"),
            }

            match machine.on_close() {
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Reconnecting");
                    tokio::time::sleep(delay).await;
                    machine.on_redial();
                }
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn session<F>(&self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>, on_hello: &mut F)
    where
        F: FnMut(Value),
    {
        let (mut sender, mut receiver) = ws.split();
        let mut ticker = tokio::time::interval(self.ping_interval);
        ticker.tick().await;

        let ping = match codec::encode(&Envelope::ping()) {
            Ok(frame) => String::from_utf8_lossy(&frame).into_owned(),
            Err(e) => {
                warn!(error = %e, "Cannot encode ping");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if sender.send(Message::Text(ping.clone())).await.is_err() {
                        break;
                    }
                }
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => match codec::decode(text.as_bytes()) {
                        Ok(envelope) if envelope.frame_type() == FrameType::Hello => {
                            on_hello(envelope.data.unwrap_or(Value::Null));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Failed to parse message"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Dashboard socket error");
                        break;
                    }
                }
            }
        }
    }
}
