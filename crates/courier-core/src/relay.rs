//! Event-routing relay for Courier.
//!
//! One dispatch arm per inbound event type. Every addressed arm follows
//! the same algorithm: read the target identity from the payload, resolve
//! it through the registry, and forward a reshaped event to that session
//! only. An unresolved target is a silent drop: no error to the sender,
//! no retry, no queueing. The durable store behind the data-access API is
//! the source of truth for history; the relay only accelerates the
//! online case.

use crate::registry::Registry;
use crate::session::{SessionHub, SessionId};
use courier_protocol::{ClientEvent, NotificationKind, ServerEvent};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace};

/// Current unix time in milliseconds.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Synthesize a message id from the current time.
///
/// Only needs to be stable enough to correlate a `send_message` with its
/// `message_delivered` echo within one relay round-trip; uniqueness
/// across senders is not required.
fn synthesize_message_id() -> String {
    format!("srv-{}", now_ms())
}

/// The event-routing relay.
///
/// Owns the session hub and the identity registry. Constructed once at
/// process start and shared across connection tasks; it lives for the
/// process lifetime and is rebuilt from scratch on restart.
#[derive(Debug, Default)]
pub struct Relay {
    registry: Registry,
    hub: SessionHub,
}

impl Relay {
    /// Create a new relay with no connected sessions.
    #[must_use]
    pub fn new() -> Self {
        info!("Creating relay");
        Self::default()
    }

    /// Get the identity registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the session hub.
    #[must_use]
    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Attach a new transport session.
    ///
    /// The session starts unregistered: it can receive broadcasts but is
    /// not a routing target until it sends a `register` event.
    pub fn connect(&self, session: &SessionId) -> tokio::sync::mpsc::UnboundedReceiver<ServerEvent> {
        self.hub.connect(session)
    }

    /// Tear down a session on transport close.
    ///
    /// Runs unconditionally whatever state the session was in; this is
    /// the only cleanup path.
    pub fn disconnect(&self, session: &SessionId) {
        self.hub.disconnect(session);
        self.registry.unregister(session);
    }

    /// Process one inbound event from a session.
    ///
    /// Returns the number of sessions the event was forwarded to. Zero
    /// means the event produced no delivery: an offline target, or an
    /// event (like `register`) that forwards nothing.
    pub fn dispatch(&self, session: &SessionId, event: ClientEvent) -> usize {
        trace!(session = %session, event = event.tag(), "Dispatching event");

        match event {
            ClientEvent::Register(user) => {
                self.registry.register(user, session.clone());
                0
            }

            ClientEvent::SendMessage {
                sender_id,
                receiver_id,
                content,
                timestamp,
                id,
                sender_name,
                sender_avatar,
                conversation_id,
                kind,
            } => {
                let Some(receiver) = self.registry.resolve(&receiver_id) else {
                    debug!(receiver = %receiver_id, "Recipient offline, message dropped");
                    return 0;
                };

                let message_id = id.unwrap_or_else(synthesize_message_id);
                let mut delivered = 0;

                delivered += usize::from(self.hub.send(
                    &receiver,
                    ServerEvent::ReceiveMessage {
                        sender_id: sender_id.clone(),
                        sender_name,
                        sender_avatar,
                        content,
                        timestamp,
                        conversation_id: conversation_id.clone(),
                        kind: kind.unwrap_or_else(|| "text".to_string()),
                        id: message_id.clone(),
                    },
                ));

                // Delivery echo, only when the sender's own session resolves.
                if let Some(sender) = self.registry.resolve(&sender_id) {
                    delivered += usize::from(self.hub.send(
                        &sender,
                        ServerEvent::MessageDelivered {
                            id: message_id,
                            conversation_id,
                        },
                    ));
                }

                delivered
            }

            ClientEvent::MarkAsRead {
                conversation_id,
                message_ids,
                reader_id,
                sender_id,
            } => self.forward(
                &sender_id,
                ServerEvent::MessageRead {
                    conversation_id,
                    message_ids,
                    reader_id,
                },
            ),

            ClientEvent::DeleteMessage {
                message_id,
                receiver_id,
            } => self.forward(&receiver_id, ServerEvent::MessageDeleted { message_id }),

            ClientEvent::DeleteConversation {
                sender_id,
                receiver_id,
            } => self.forward(&receiver_id, ServerEvent::ConversationDeleted { sender_id }),

            ClientEvent::Typing {
                sender_id,
                receiver_id,
            } => self.forward(&receiver_id, ServerEvent::UserTyping { sender_id }),

            ClientEvent::StopTyping {
                sender_id,
                receiver_id,
            } => self.forward(&receiver_id, ServerEvent::UserStopTyping { sender_id }),

            ClientEvent::CallUser {
                from,
                to,
                offer,
                kind,
            } => self.forward(&to, ServerEvent::IncomingCall { from, offer, kind }),

            ClientEvent::AnswerCall { from, to, answer } => {
                self.forward(&to, ServerEvent::CallAnswered { from, answer })
            }

            ClientEvent::IceCandidate {
                from,
                to,
                candidate,
            } => self.forward(&to, ServerEvent::IceCandidate { from, candidate }),

            ClientEvent::Hangup { from, to } => {
                self.forward(&to, ServerEvent::CallEnded { from })
            }

            ClientEvent::RejectCall { from, to } => {
                self.forward(&to, ServerEvent::CallRejected { from })
            }

            ClientEvent::NewUserJoined(profile) => {
                debug!(username = %profile.username, "Broadcasting user-joined notification");
                self.hub.broadcast_except(
                    session,
                    &ServerEvent::Notification {
                        kind: NotificationKind::UserJoined,
                        data: profile,
                        timestamp: now_ms(),
                    },
                )
            }
        }
    }

    /// Resolve a target identity and forward one event to its session.
    ///
    /// The uniform resolve-or-drop policy: an unregistered target yields
    /// zero deliveries and nothing else happens.
    fn forward(&self, target: &str, event: ServerEvent) -> usize {
        match self.registry.resolve(target) {
            Some(session) => usize::from(self.hub.send(&session, event)),
            None => {
                debug!(target = %target, "Target not registered, event dropped");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::UserProfile;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn attach(relay: &Relay, session: &str) -> (SessionId, UnboundedReceiver<ServerEvent>) {
        let id = SessionId::from(session);
        let rx = relay.connect(&id);
        (id, rx)
    }

    fn attach_registered(
        relay: &Relay,
        user: &str,
        session: &str,
    ) -> (SessionId, UnboundedReceiver<ServerEvent>) {
        let (id, rx) = attach(relay, session);
        relay.dispatch(&id, ClientEvent::Register(user.to_string()));
        (id, rx)
    }

    fn send_message(sender: &str, receiver: &str, content: &str, id: Option<&str>) -> ClientEvent {
        ClientEvent::SendMessage {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            timestamp: json!(1_700_000_000_000u64),
            id: id.map(str::to_string),
            sender_name: None,
            sender_avatar: None,
            conversation_id: Some("c1".to_string()),
            kind: None,
        }
    }

    #[test]
    fn test_register_binds_identity() {
        let relay = Relay::new();
        let (session, _rx) = attach(&relay, "sA");

        let delivered = relay.dispatch(&session, ClientEvent::Register("alice".into()));
        assert_eq!(delivered, 0);
        assert_eq!(relay.registry().resolve("alice"), Some(session));
    }

    // Both registered, message with a client-supplied id.
    #[test]
    fn test_message_delivery_with_echo() {
        let relay = Relay::new();
        let (session_a, mut rx_a) = attach_registered(&relay, "alice", "sA");
        let (_session_b, mut rx_b) = attach_registered(&relay, "bob", "sB");

        let delivered = relay.dispatch(&session_a, send_message("alice", "bob", "hi", Some("m1")));
        assert_eq!(delivered, 2);

        match rx_b.try_recv().unwrap() {
            ServerEvent::ReceiveMessage {
                sender_id,
                content,
                kind,
                id,
                ..
            } => {
                assert_eq!(sender_id, "alice");
                assert_eq!(content, "hi");
                assert_eq!(kind, "text");
                assert_eq!(id, "m1");
            }
            other => panic!("Expected ReceiveMessage, got {other:?}"),
        }

        match rx_a.try_recv().unwrap() {
            ServerEvent::MessageDelivered {
                id,
                conversation_id,
            } => {
                assert_eq!(id, "m1");
                assert_eq!(conversation_id.as_deref(), Some("c1"));
            }
            other => panic!("Expected MessageDelivered, got {other:?}"),
        }

        // Exactly one event each.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    // Receiver never registered.
    #[test]
    fn test_message_to_offline_receiver_is_dropped() {
        let relay = Relay::new();
        let (session_a, mut rx_a) = attach_registered(&relay, "alice", "sA");

        let delivered = relay.dispatch(&session_a, send_message("alice", "bob", "hi", Some("m1")));
        assert_eq!(delivered, 0);
        // No delivery echo either.
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_message_id_synthesized_when_absent() {
        let relay = Relay::new();
        let (session_a, mut rx_a) = attach_registered(&relay, "alice", "sA");
        let (_session_b, mut rx_b) = attach_registered(&relay, "bob", "sB");

        relay.dispatch(&session_a, send_message("alice", "bob", "hi", None));

        let received_id = match rx_b.try_recv().unwrap() {
            ServerEvent::ReceiveMessage { id, .. } => id,
            other => panic!("Expected ReceiveMessage, got {other:?}"),
        };
        let echoed_id = match rx_a.try_recv().unwrap() {
            ServerEvent::MessageDelivered { id, .. } => id,
            other => panic!("Expected MessageDelivered, got {other:?}"),
        };
        assert!(received_id.starts_with("srv-"));
        assert_eq!(received_id, echoed_id);
    }

    #[test]
    fn test_no_echo_when_sender_unregistered() {
        let relay = Relay::new();
        // The sending session never registered, but addresses a live receiver.
        let (session, _rx) = attach(&relay, "s-anon");
        let (_session_b, mut rx_b) = attach_registered(&relay, "bob", "sB");

        let delivered = relay.dispatch(&session, send_message("alice", "bob", "hi", Some("m1")));
        assert_eq!(delivered, 1);
        assert!(rx_b.try_recv().is_ok());
    }

    // Re-registration routes to the newest session only.
    #[test]
    fn test_reregistration_routes_to_new_session() {
        let relay = Relay::new();
        let (_session_a1, mut rx_a1) = attach_registered(&relay, "alice", "sA");
        let (_session_a2, mut rx_a2) = attach_registered(&relay, "alice", "sA2");
        let (session_b, _rx_b) = attach_registered(&relay, "bob", "sB");

        let delivered = relay.dispatch(&session_b, send_message("bob", "alice", "hey", Some("m2")));
        assert_eq!(delivered, 1);
        assert!(rx_a1.try_recv().is_err());
        assert!(matches!(
            rx_a2.try_recv().unwrap(),
            ServerEvent::ReceiveMessage { .. }
        ));
    }

    // Disconnect purges the registry entry.
    #[test]
    fn test_disconnect_makes_user_unroutable() {
        let relay = Relay::new();
        let (session_a, _rx_a) = attach_registered(&relay, "alice", "sA");
        let (session_b, _rx_b) = attach_registered(&relay, "bob", "sB");

        relay.disconnect(&session_a);
        assert_eq!(relay.registry().resolve("alice"), None);

        let delivered = relay.dispatch(&session_b, send_message("bob", "alice", "hi", None));
        assert_eq!(delivered, 0);
    }

    // Read receipt goes to the original sender.
    #[test]
    fn test_mark_as_read_notifies_original_sender() {
        let relay = Relay::new();
        let (_session_a, mut rx_a) = attach_registered(&relay, "alice", "sA");
        let (session_b, _rx_b) = attach_registered(&relay, "bob", "sB");

        relay.dispatch(
            &session_b,
            ClientEvent::MarkAsRead {
                conversation_id: "c1".into(),
                message_ids: vec!["m1".into(), "m2".into()],
                reader_id: "bob".into(),
                sender_id: "alice".into(),
            },
        );

        match rx_a.try_recv().unwrap() {
            ServerEvent::MessageRead {
                conversation_id,
                message_ids,
                reader_id,
            } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(message_ids, vec!["m1", "m2"]);
                assert_eq!(reader_id, "bob");
            }
            other => panic!("Expected MessageRead, got {other:?}"),
        }
    }

    #[test]
    fn test_typing_indicators() {
        let relay = Relay::new();
        let (session_a, _rx_a) = attach_registered(&relay, "alice", "sA");
        let (_session_b, mut rx_b) = attach_registered(&relay, "bob", "sB");

        relay.dispatch(
            &session_a,
            ClientEvent::Typing {
                sender_id: "alice".into(),
                receiver_id: "bob".into(),
            },
        );
        relay.dispatch(
            &session_a,
            ClientEvent::StopTyping {
                sender_id: "alice".into(),
                receiver_id: "bob".into(),
            },
        );

        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::UserTyping { .. }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::UserStopTyping { .. }
        ));
    }

    #[test]
    fn test_deletion_events() {
        let relay = Relay::new();
        let (session_a, _rx_a) = attach_registered(&relay, "alice", "sA");
        let (_session_b, mut rx_b) = attach_registered(&relay, "bob", "sB");

        relay.dispatch(
            &session_a,
            ClientEvent::DeleteMessage {
                message_id: "m1".into(),
                receiver_id: "bob".into(),
            },
        );
        relay.dispatch(
            &session_a,
            ClientEvent::DeleteConversation {
                sender_id: "alice".into(),
                receiver_id: "bob".into(),
            },
        );

        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::MessageDeleted { .. }
        ));
        match rx_b.try_recv().unwrap() {
            ServerEvent::ConversationDeleted { sender_id } => assert_eq!(sender_id, "alice"),
            other => panic!("Expected ConversationDeleted, got {other:?}"),
        }
    }

    #[test]
    fn test_call_signaling_handshake() {
        let relay = Relay::new();
        let (session_a, mut rx_a) = attach_registered(&relay, "alice", "sA");
        let (session_b, mut rx_b) = attach_registered(&relay, "bob", "sB");

        relay.dispatch(
            &session_a,
            ClientEvent::CallUser {
                from: "alice".into(),
                to: "bob".into(),
                offer: json!({"sdp": "offer"}),
                kind: courier_protocol::CallKind::Video,
            },
        );
        match rx_b.try_recv().unwrap() {
            ServerEvent::IncomingCall { from, kind, .. } => {
                assert_eq!(from, "alice");
                assert_eq!(kind, courier_protocol::CallKind::Video);
            }
            other => panic!("Expected IncomingCall, got {other:?}"),
        }

        relay.dispatch(
            &session_b,
            ClientEvent::AnswerCall {
                from: "bob".into(),
                to: "alice".into(),
                answer: json!({"sdp": "answer"}),
            },
        );
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerEvent::CallAnswered { .. }
        ));

        relay.dispatch(
            &session_b,
            ClientEvent::IceCandidate {
                from: "bob".into(),
                to: "alice".into(),
                candidate: json!({"candidate": "..."}),
            },
        );
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerEvent::IceCandidate { .. }
        ));

        relay.dispatch(
            &session_a,
            ClientEvent::Hangup {
                from: "alice".into(),
                to: "bob".into(),
            },
        );
        match rx_b.try_recv().unwrap() {
            ServerEvent::CallEnded { from } => assert_eq!(from, "alice"),
            other => panic!("Expected CallEnded, got {other:?}"),
        }
    }

    #[test]
    fn test_reject_call() {
        let relay = Relay::new();
        let (_session_a, mut rx_a) = attach_registered(&relay, "alice", "sA");
        let (session_b, _rx_b) = attach_registered(&relay, "bob", "sB");

        relay.dispatch(
            &session_b,
            ClientEvent::RejectCall {
                from: "bob".into(),
                to: "alice".into(),
            },
        );
        match rx_a.try_recv().unwrap() {
            ServerEvent::CallRejected { from } => assert_eq!(from, "bob"),
            other => panic!("Expected CallRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_new_user_broadcast_skips_originator() {
        let relay = Relay::new();
        // Unregistered sessions still receive broadcasts.
        let (session_0, mut rx_0) = attach(&relay, "s0");
        let (_session_1, mut rx_1) = attach_registered(&relay, "bob", "s1");
        let (_session_2, mut rx_2) = attach(&relay, "s2");

        let delivered = relay.dispatch(
            &session_0,
            ClientEvent::NewUserJoined(UserProfile {
                id: "u9".into(),
                name: "Carol".into(),
                username: "carol".into(),
                avatar: String::new(),
            }),
        );
        assert_eq!(delivered, 2);
        assert!(rx_0.try_recv().is_err());

        for rx in [&mut rx_1, &mut rx_2] {
            match rx.try_recv().unwrap() {
                ServerEvent::Notification {
                    kind,
                    data,
                    timestamp,
                } => {
                    assert_eq!(kind, NotificationKind::UserJoined);
                    assert_eq!(data.username, "carol");
                    assert!(timestamp > 0);
                }
                other => panic!("Expected Notification, got {other:?}"),
            }
        }
    }
}
