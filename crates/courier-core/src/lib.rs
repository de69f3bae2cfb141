//! # courier-core
//!
//! Session registry and event-routing relay for the Courier chat server.
//!
//! This crate provides the load-bearing pieces:
//!
//! - **SessionHub** - Outbox for every live transport session
//! - **Registry** - Identity-to-session map, the routing source of truth
//! - **Relay** - Typed-event forwarding between sessions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Session    │────▶│   Relay     │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ SessionHub  │
//!                     └─────────────┘
//! ```
//!
//! A session attaches through [`Relay::connect`], binds an identity with a
//! `register` event, and from then on addressed events are resolved through
//! the registry and forwarded to the target's outbox. Delivery is
//! fire-and-forget: an offline recipient is a silent drop, never an error.

pub mod registry;
pub mod relay;
pub mod session;

pub use registry::Registry;
pub use relay::Relay;
pub use session::{SessionHub, SessionId};
