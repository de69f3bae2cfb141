//! Live transport sessions and their outboxes.
//!
//! A session is one live transport connection. It changes on every
//! reconnect, unlike the user identity bound to it via the registry.

use courier_protocol::ServerEvent;
use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Unique identifier for a live transport session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new session ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh session ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Self(format!("sess_{timestamp:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outbox map for every connected session.
///
/// The hub knows nothing about identities: it addresses raw sessions. It is
/// the delivery end of the relay and the whole-server broadcast path.
#[derive(Debug, Default)]
pub struct SessionHub {
    /// Outbound event sender per live session.
    outboxes: DashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>,
}

impl SessionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session, returning the receiving half of its outbox.
    ///
    /// The transport task owns the receiver and pumps it to the wire. A
    /// second attach for the same session replaces the previous outbox.
    pub fn connect(&self, session: &SessionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(session.clone(), tx);
        debug!(session = %session, "Session attached");
        rx
    }

    /// Detach a session. No-op if the session was never attached.
    pub fn disconnect(&self, session: &SessionId) {
        if self.outboxes.remove(session).is_some() {
            debug!(session = %session, "Session detached");
        }
    }

    /// Check if a session is currently attached.
    #[must_use]
    pub fn is_connected(&self, session: &SessionId) -> bool {
        self.outboxes.contains_key(session)
    }

    /// Deliver an event to one session.
    ///
    /// Returns `true` if the session is attached and the event was
    /// enqueued on its outbox.
    pub fn send(&self, session: &SessionId, event: ServerEvent) -> bool {
        match self.outboxes.get(session) {
            Some(outbox) => {
                trace!(session = %session, event = event.tag(), "Delivering event");
                outbox.send(event).is_ok()
            }
            None => false,
        }
    }

    /// Deliver an event to every attached session except the originator.
    ///
    /// Returns the number of sessions the event was enqueued for.
    pub fn broadcast_except(&self, origin: &SessionId, event: &ServerEvent) -> usize {
        let mut count = 0;
        for entry in self.outboxes.iter() {
            if entry.key() == origin {
                continue;
            }
            if entry.value().send(event.clone()).is_ok() {
                count += 1;
            }
        }
        trace!(origin = %origin, event = event.tag(), recipients = count, "Broadcast");
        count
    }

    /// Get the number of attached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Check if no sessions are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}
