//! Connection handlers for the Courier relay.
//!
//! This module handles the WebSocket connection lifecycle and event
//! processing: attach on upgrade, decode-and-dispatch inbound frames,
//! pump the session outbox to the wire, and tear down on close.

use crate::config::{Config, CorsConfig};
use crate::fallback::{self, PollingInboxes};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderValue,
    response::IntoResponse,
    routing::get,
    Router,
};
use courier_core::{Relay, SessionId};
use courier_protocol::{codec, ProtocolError};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The event-routing relay.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
    /// Parked outbox receivers for long-polling sessions.
    pub polling: PollingInboxes,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            relay: Relay::new(),
            config,
            polling: PollingInboxes::new(),
        }
    }
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

    // Build router
    let mut app = Router::new().route("/health", get(health_handler));

    if config.transport.websocket {
        app = app.route(&config.transport.websocket_path, get(ws_handler));
    }
    if config.transport.polling {
        app = app.merge(fallback::routes(&config.transport.polling_path));
    }

    let app = app.layer(cors_layer(&config.cors)?).with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Courier relay listening on {}", addr);
    if config.transport.websocket {
        info!(
            "WebSocket endpoint: ws://{}{}",
            addr, config.transport.websocket_path
        );
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the CORS layer from configuration.
fn cors_layer(cors: &CorsConfig) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if cors.allowed_origin == "*" {
        return Ok(layer.allow_origin(Any));
    }

    let origin = cors
        .allowed_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", cors.allowed_origin))?;
    Ok(layer.allow_origin(origin))
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let session = SessionId::generate();
    debug!(session = %session, "WebSocket connected");

    // Attach the session; it can receive broadcasts immediately but is
    // not a routing target until it registers.
    let mut outbox = state.relay.connect(&session);

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Event processing loop
    loop {
        tokio::select! {
            biased;

            // Pump events addressed to this session onto the wire
            Some(event) = outbox.recv() => {
                match codec::encode(&event) {
                    Ok(text) => {
                        metrics::record_event("outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(session = %session, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&text, &session, &state);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(session = %session, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup runs unconditionally: this is the only path that purges the
    // registry entry, whatever state the session was in.
    state.relay.disconnect(&session);
    metrics::set_registered_users(state.relay.registry().len());

    debug!(session = %session, "WebSocket disconnected");
}

/// Decode and dispatch one inbound text frame.
///
/// A malformed or oversized frame is logged and dropped; it never tears
/// down the connection that sent it.
fn handle_text_frame(text: &str, session: &SessionId, state: &Arc<AppState>) {
    let event = match codec::decode(text, state.config.limits.max_event_size) {
        Ok(event) => event,
        Err(e @ ProtocolError::EventTooLarge { .. }) => {
            warn!(session = %session, error = %e, "Oversized frame dropped");
            metrics::record_error("oversized");
            return;
        }
        Err(e) => {
            warn!(session = %session, error = %e, "Malformed frame dropped");
            metrics::record_error("decode");
            return;
        }
    };

    metrics::record_event("inbound");
    let tag = event.tag();
    let delivered = state.relay.dispatch(session, event);

    match tag {
        "register" => metrics::set_registered_users(state.relay.registry().len()),
        // A broadcast reaching nobody is an empty room, not a drop.
        "new_user_joined" => {}
        _ if delivered == 0 => metrics::record_drop(),
        _ => {}
    }
}
