//! Codec for encoding and decoding Courier events.
//!
//! Events are exchanged as JSON text frames, one event per frame. The
//! transport (WebSocket text messages, long-poll HTTP bodies) provides the
//! framing, so no length prefix is needed.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Default maximum inbound event size in bytes (64 KiB).
///
/// Deployments pick their own cap; this is the fallback used by server
/// configuration defaults.
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
///
/// A decode failure means the frame gets logged and dropped; it must never
/// tear down the connection that sent it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds the configured maximum size.
    #[error("Event size {size} exceeds maximum {limit}")]
    EventTooLarge { size: usize, limit: usize },

    /// JSON encoding/decoding error.
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a server event to a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a client event from a JSON text frame.
///
/// The size cap comes from the caller (server configuration), so raising
/// the configured limit raises the limit enforced here.
///
/// # Errors
///
/// Returns an error if the frame exceeds `max_size`, is not valid JSON,
/// carries an unknown event tag, or is missing a required payload field.
pub fn decode(text: &str, max_size: usize) -> Result<ClientEvent, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::EventTooLarge {
            size: text.len(),
            limit: max_size,
        });
    }
    Ok(serde_json::from_str(text)?)
}
