//! Long-polling fallback transport.
//!
//! For clients that cannot hold a WebSocket open, the same relay is
//! reachable over plain HTTP: open a session, POST events in, and GET to
//! long-poll the session's outbox. Semantics are identical to the
//! WebSocket path: same registry, same dispatch, same drop policy.
//!
//! There is no idle eviction: a polling client that stops polling without
//! DELETE leaks its session until closed, the same way a half-open
//! WebSocket does until the transport reports the closure.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use courier_core::SessionId;
use courier_protocol::{codec, ProtocolError, ServerEvent};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedReceiver, Mutex};
use tracing::{debug, warn};

/// Parked outbox receivers for polling sessions.
///
/// A WebSocket session's outbox receiver lives in its connection task;
/// a polling session has no task, so the receiver is parked here between
/// polls and locked by whichever poll is currently draining it.
#[derive(Debug, Default)]
pub struct PollingInboxes {
    inboxes: DashMap<SessionId, Arc<Mutex<UnboundedReceiver<ServerEvent>>>>,
}

impl PollingInboxes {
    /// Create an empty inbox store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, session: &SessionId) -> Option<Arc<Mutex<UnboundedReceiver<ServerEvent>>>> {
        self.inboxes.get(session).map(|e| e.value().clone())
    }
}

/// Build the long-polling routes under the given base path.
pub fn routes(base: &str) -> Router<Arc<AppState>> {
    let session_path = format!("{base}/:session");
    Router::new().route(base, post(open_session)).route(
        &session_path,
        get(poll_events).post(submit_event).delete(close_session),
    )
}

/// Open a new polling session.
async fn open_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = SessionId::generate();
    let inbox = state.relay.connect(&session);
    state
        .polling
        .inboxes
        .insert(session.clone(), Arc::new(Mutex::new(inbox)));

    metrics::record_connection();
    debug!(session = %session, "Polling session opened");

    (
        StatusCode::CREATED,
        Json(json!({ "sessionId": session.as_str() })),
    )
}

/// Long-poll the session's outbox.
///
/// Returns immediately with whatever is queued; if nothing is, holds the
/// request open up to `polling_wait_ms` for the first event.
async fn poll_events(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
) -> Response {
    let session = SessionId::from(session);
    let Some(inbox) = state.polling.get(&session) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut inbox = inbox.lock().await;
    let mut events = Vec::new();
    while let Ok(event) = inbox.try_recv() {
        events.push(event);
    }

    if events.is_empty() {
        let wait = Duration::from_millis(state.config.transport.polling_wait_ms);
        if let Ok(Some(event)) = tokio::time::timeout(wait, inbox.recv()).await {
            events.push(event);
            // Pick up anything that arrived in the same instant.
            while let Ok(event) = inbox.try_recv() {
                events.push(event);
            }
        }
    }

    for _ in &events {
        metrics::record_event("outbound");
    }

    Json(events).into_response()
}

/// Submit one client event over the fallback transport.
///
/// The body is the same JSON text frame the WebSocket transport carries.
async fn submit_event(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    body: String,
) -> Response {
    let session = SessionId::from(session);
    if state.polling.get(&session).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let event = match codec::decode(&body, state.config.limits.max_event_size) {
        Ok(event) => event,
        Err(e @ ProtocolError::EventTooLarge { .. }) => {
            warn!(session = %session, error = %e, "Oversized frame dropped");
            metrics::record_error("oversized");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
        Err(e) => {
            warn!(session = %session, error = %e, "Malformed frame dropped");
            metrics::record_error("decode");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    metrics::record_event("inbound");
    let tag = event.tag();
    let delivered = state.relay.dispatch(&session, event);

    match tag {
        "register" => metrics::set_registered_users(state.relay.registry().len()),
        "new_user_joined" => {}
        _ if delivered == 0 => metrics::record_drop(),
        _ => {}
    }

    Json(json!({ "delivered": delivered })).into_response()
}

/// Close a polling session.
///
/// The polling client's only teardown path; purges the registry entry
/// like a WebSocket close does.
async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
) -> StatusCode {
    let session = SessionId::from(session);
    if state.polling.inboxes.remove(&session).is_none() {
        return StatusCode::NOT_FOUND;
    }

    state.relay.disconnect(&session);
    metrics::record_disconnection();
    metrics::set_registered_users(state.relay.registry().len());
    debug!(session = %session, "Polling session closed");

    StatusCode::NO_CONTENT
}
