//! HTTP and WebSocket handlers for the Beacon server.
//!
//! Dashboards attach at the WebSocket path; the attendance backend posts
//! events to the broadcast paths. Both talk to a single shared [`Hub`].

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use beacon_core::{Dispatch, Hub, HubError};
use beacon_protocol::ProtocolError;
use beacon_transport::websocket::{self, InboundFrame, WebSocketConfig};
use beacon_transport::{close_code, MemorySocketHost, Socket};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The broadcast hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    ws_config: WebSocketConfig,
}

impl AppState {
    /// Create new app state over an in-process socket host.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let host = Arc::new(MemorySocketHost::new());
        Self {
            hub: Hub::with_config(host, config.hub_config()),
            ws_config: config.websocket_config(),
            config,
        }
    }
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Dashboard role, stored as the connection's attachment tag.
    pub role: Option<String>,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    let mut triggers = Router::new();
    for path in &state.config.transport.broadcast_paths {
        triggers = triggers.route(path, post(broadcast_handler));
    }

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .merge(triggers.layer(cors))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    if let Some(period) = config.sweep_interval() {
        tokio::spawn(sweep_dead_connections(Arc::clone(&state), period));
    }

    let app = router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    for path in &config.transport.broadcast_paths {
        info!("Broadcast trigger: POST http://{}{}", addr, path);
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically evict connections that stopped pinging.
async fn sweep_dead_connections(state: Arc<AppState>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let evicted = state.hub.prune_dead();
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Keepalive sweep evicted connections");
        }
        metrics::record_dropped("keepalive", evicted.len());
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub counters.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.stats())
}

/// Broadcast trigger handler.
///
/// The request body is the event `data`; it reaches dashboards as
/// `{"type":"hello","data":...}`.
async fn broadcast_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let limit = state.config.transport.max_message_size;
    if body.len() > limit {
        warn!(size = body.len(), limit, "Broadcast body too large");
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");
    }

    let data: Value = match serde_json::from_slice(&body) {
        Ok(data) => data,
        Err(e) => {
            debug!(error = %e, "Rejecting broadcast with invalid JSON");
            metrics::record_error("trigger");
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON body: {e}"));
        }
    };

    let start = Instant::now();
    match state.hub.broadcast(data) {
        Ok(report) => {
            metrics::record_broadcast(
                report.delivered,
                report.dropped,
                start.elapsed().as_secs_f64(),
            );
            debug!(
                delivered = report.delivered,
                dropped = report.dropped,
                "Broadcast"
            );
            Json(json!({
                "ok": true,
                "delivered": report.delivered,
                "dropped": report.dropped,
            }))
            .into_response()
        }
        Err(HubError::Protocol(ProtocolError::FrameTooLarge(size))) => {
            warn!(size, "Broadcast frame too large");
            error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
        }
        Err(e) => {
            error!(error = %e, "Broadcast failed");
            metrics::record_error("broadcast");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Broadcast failed")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, addr, params.role, state))
}

/// Handle a dashboard connection.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    role: Option<String>,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (socket, mut inbound) = websocket::split(socket, &state.ws_config, Some(addr));
    let socket: Arc<dyn Socket> = socket;

    match state.hub.attach(Arc::clone(&socket), role) {
        Ok(id) => debug!(connection = %id, socket = %socket.id(), remote = %addr, "WebSocket connected"),
        Err(e) => {
            warn!(socket = %socket.id(), error = %e, "Failed to attach socket");
            metrics::record_error("attach");
            socket.close(close_code::INTERNAL_ERROR, "attach failed");
            return;
        }
    }

    // Frames from one socket are handled strictly in arrival order.
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(InboundFrame::Data(data)) => {
                metrics::record_message(data.len(), "inbound");
                match state.hub.on_message(&socket, &data) {
                    Ok(Dispatch::Malformed) => metrics::record_error("protocol"),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(socket = %socket.id(), error = %e, "Frame handling failed");
                        if !socket.is_open() {
                            break;
                        }
                    }
                }
            }
            Ok(InboundFrame::Close { code, reason }) => {
                state.hub.on_close(socket.id(), code, &reason);
                return;
            }
            Err(e) => {
                metrics::record_error("websocket");
                state.hub.on_error(socket.id(), &e);
                return;
            }
        }
    }

    state
        .hub
        .on_close(socket.id(), close_code::ABNORMAL, "stream ended");
    debug!(socket = %socket.id(), "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use beacon_transport::MemorySocket;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(Config::default()));
        (router(Arc::clone(&state)), state)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_attached_dashboard() {
        let (app, state) = app();
        let (socket, mut peer) = MemorySocket::pair(8);
        state.hub.attach(socket, None).unwrap();

        for path in ["/broadcast", "/api/broadcast"] {
            let response = app
                .clone()
                .oneshot(
                    Request::post(path)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Body::from(r#"{"status":"tmp inserted","id":"42"}"#))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                body_json(response).await,
                json!({"ok": true, "delivered": 1, "dropped": 0})
            );
        }

        let frames = peer.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, Some(json!({"status": "tmp inserted", "id": "42"})));
    }

    #[tokio::test]
    async fn test_broadcast_without_dashboards_succeeds() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::post("/broadcast").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["delivered"], 0);
    }

    #[tokio::test]
    async fn test_bad_json_is_client_error() {
        let (app, state) = app();
        let response = app
            .oneshot(
                Request::post("/broadcast")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["ok"], false);
        assert_eq!(state.hub.stats().broadcasts, 0);
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let (app, _) = app();
        let body = format!("\"{}\"", "x".repeat(64 * 1024 + 1));
        let response = app
            .oneshot(Request::post("/broadcast").body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_trigger_requires_post() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/broadcast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_headers_on_trigger() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::post("/api/broadcast")
                    .header("origin", "http://dashboard.local")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }

    #[tokio::test]
    async fn test_websocket_ping_and_broadcast() {
        use beacon_protocol::{codec, FrameType};
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let (app, state) = app();
        let addr = serve(app).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?role=kiosk"))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();

        let reply = ws.next().await.unwrap().unwrap().into_text().unwrap();
        assert_eq!(
            codec::decode(reply.as_bytes()).unwrap().frame_type(),
            FrameType::Pong
        );
        let conn = state.hub.registry().most_recent().unwrap();
        assert_eq!(conn.tag.as_deref(), Some("kiosk"));

        state
            .hub
            .broadcast(json!({"status": "delete_ic", "ic": "9"}))
            .unwrap();
        let frame = ws.next().await.unwrap().unwrap().into_text().unwrap();
        let envelope = codec::decode(frame.as_bytes()).unwrap();
        assert_eq!(envelope.frame_type(), FrameType::Hello);
        assert_eq!(envelope.data, Some(json!({"status": "delete_ic", "ic": "9"})));

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_dashboard_client_receives_hello() {
        use beacon_transport::client::DashboardClient;
        use std::time::Duration;

        let (app, state) = app();
        let addr = serve(app).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let client = tokio::spawn(DashboardClient::new(format!("ws://{addr}/ws")).run(
            move |data| {
                let _ = tx.send(data);
            },
        ));

        while state.hub.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        state
            .hub
            .broadcast(json!({"status": "tmp inserted", "id": "7"}))
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            json!({"status": "tmp inserted", "id": "7"})
        );
        client.abort();
    }

    #[tokio::test]
    async fn test_stats() {
        let (app, state) = app();
        let (socket, _peer) = MemorySocket::pair(8);
        state.hub.attach(socket, None).unwrap();

        let response = app
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["connections"], 1);
    }
}
