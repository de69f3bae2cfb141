//! Event types for the Courier protocol.
//!
//! Each wire event carries a string tag and a structured payload. Tags are
//! preserved verbatim from the client protocol, which mixes snake_case
//! (chat events) and kebab-case (call signaling); the renames below are
//! load-bearing, not stylistic.

use serde::{Deserialize, Serialize};

/// A stable, provider-issued user identity.
///
/// Opaque to the relay: it is only ever compared and used as a map key.
pub type UserId = String;

/// Audio or video call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

/// Public profile summary announced to other users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub avatar: String,
}

/// Discriminator for `notification` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    UserJoined,
}

/// An event sent by a client to the relay.
///
/// The WebRTC blobs (`offer`, `answer`, `candidate`) and client-supplied
/// timestamps are opaque pass-through; the relay never inspects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Bind the sending session to a user identity.
    #[serde(rename = "register")]
    Register(UserId),

    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        timestamp: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        /// Message kind ("text", "image", ...); defaults to "text" on relay.
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },

    #[serde(rename = "mark_as_read", rename_all = "camelCase")]
    MarkAsRead {
        conversation_id: String,
        message_ids: Vec<String>,
        reader_id: UserId,
        /// Original sender of the messages, the one to notify.
        sender_id: UserId,
    },

    #[serde(rename = "delete_message", rename_all = "camelCase")]
    DeleteMessage {
        message_id: String,
        receiver_id: UserId,
    },

    #[serde(rename = "delete_conversation", rename_all = "camelCase")]
    DeleteConversation {
        sender_id: UserId,
        receiver_id: UserId,
    },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        sender_id: UserId,
        receiver_id: UserId,
    },

    #[serde(rename = "stop_typing", rename_all = "camelCase")]
    StopTyping {
        sender_id: UserId,
        receiver_id: UserId,
    },

    /// Call offer (the initial WebRTC handshake step).
    #[serde(rename = "call-user")]
    CallUser {
        from: UserId,
        to: UserId,
        offer: serde_json::Value,
        #[serde(rename = "type")]
        kind: CallKind,
    },

    #[serde(rename = "answer-call")]
    AnswerCall {
        from: UserId,
        to: UserId,
        answer: serde_json::Value,
    },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        from: UserId,
        to: UserId,
        candidate: serde_json::Value,
    },

    #[serde(rename = "hangup")]
    Hangup { from: UserId, to: UserId },

    #[serde(rename = "reject-call")]
    RejectCall { from: UserId, to: UserId },

    /// Public presence announcement, broadcast to all other sessions.
    #[serde(rename = "new_user_joined")]
    NewUserJoined(UserProfile),
}

impl ClientEvent {
    /// Get the wire tag for this event.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::MarkAsRead { .. } => "mark_as_read",
            ClientEvent::DeleteMessage { .. } => "delete_message",
            ClientEvent::DeleteConversation { .. } => "delete_conversation",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stop_typing",
            ClientEvent::CallUser { .. } => "call-user",
            ClientEvent::AnswerCall { .. } => "answer-call",
            ClientEvent::IceCandidate { .. } => "ice-candidate",
            ClientEvent::Hangup { .. } => "hangup",
            ClientEvent::RejectCall { .. } => "reject-call",
            ClientEvent::NewUserJoined(_) => "new_user_joined",
        }
    }
}

/// An event forwarded by the relay to a client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receive_message", rename_all = "camelCase")]
    ReceiveMessage {
        sender_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_avatar: Option<String>,
        content: String,
        timestamp: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(rename = "type")]
        kind: String,
        /// Relay-assigned id correlating this with `message_delivered`.
        id: String,
    },

    #[serde(rename = "message_delivered", rename_all = "camelCase")]
    MessageDelivered {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },

    #[serde(rename = "message_read", rename_all = "camelCase")]
    MessageRead {
        conversation_id: String,
        message_ids: Vec<String>,
        reader_id: UserId,
    },

    #[serde(rename = "message_deleted", rename_all = "camelCase")]
    MessageDeleted { message_id: String },

    /// Tells the receiver whose conversation thread to drop.
    #[serde(rename = "conversation_deleted", rename_all = "camelCase")]
    ConversationDeleted { sender_id: UserId },

    #[serde(rename = "user_typing", rename_all = "camelCase")]
    UserTyping { sender_id: UserId },

    #[serde(rename = "user_stop_typing", rename_all = "camelCase")]
    UserStopTyping { sender_id: UserId },

    #[serde(rename = "incoming-call")]
    IncomingCall {
        from: UserId,
        offer: serde_json::Value,
        #[serde(rename = "type")]
        kind: CallKind,
    },

    #[serde(rename = "call-answered")]
    CallAnswered {
        from: UserId,
        answer: serde_json::Value,
    },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        from: UserId,
        candidate: serde_json::Value,
    },

    #[serde(rename = "call-ended")]
    CallEnded { from: UserId },

    #[serde(rename = "call-rejected")]
    CallRejected { from: UserId },

    #[serde(rename = "notification", rename_all = "camelCase")]
    Notification {
        #[serde(rename = "type")]
        kind: NotificationKind,
        data: UserProfile,
        /// Server-side unix millis, not the client clock.
        timestamp: u64,
    },
}

impl ServerEvent {
    /// Get the wire tag for this event.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage { .. } => "receive_message",
            ServerEvent::MessageDelivered { .. } => "message_delivered",
            ServerEvent::MessageRead { .. } => "message_read",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::ConversationDeleted { .. } => "conversation_deleted",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserStopTyping { .. } => "user_stop_typing",
            ServerEvent::IncomingCall { .. } => "incoming-call",
            ServerEvent::CallAnswered { .. } => "call-answered",
            ServerEvent::IceCandidate { .. } => "ice-candidate",
            ServerEvent::CallEnded { .. } => "call-ended",
            ServerEvent::CallRejected { .. } => "call-rejected",
            ServerEvent::Notification { .. } => "notification",
        }
    }
}
