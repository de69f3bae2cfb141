//! # courier-protocol
//!
//! Wire event definitions for the Courier chat relay.
//!
//! Events travel as JSON text frames of the shape
//! `{"event": "<tag>", "data": <payload>}`. Inbound (client-to-server)
//! and outbound (server-to-client) events are separate closed unions,
//! so the relay's dispatch is an exhaustive `match` rather than a
//! string-keyed handler table.

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError, MAX_EVENT_SIZE};
pub use events::{CallKind, ClientEvent, NotificationKind, ServerEvent, UserId, UserProfile};
