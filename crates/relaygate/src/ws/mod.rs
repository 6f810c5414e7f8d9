//! Realtime relay hub.
//!
//! Bridges one authoritative peer (the authoring tool) and many observers
//! (browser UIs) over long-lived WebSocket connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ui.hello / commands   ┌──────────────┐  td.hello / events  ┌───────────────┐
//! │  Observers   │ ─────────────────────▶ │  Relay Hub   │ ◀────────────────── │ Authoritative │
//! │  (browsers)  │ ◀───────────────────── │ slot + set   │ ──────────────────▶ │  peer (TD)    │
//! └──────────────┘  td.event / td.status  └──────────────┘       ui.toTd       └───────────────┘
//! ```
//!
//! The hub owns all shared state; the socket handler only moves frames
//! between a socket and the hub.

mod handler;
mod hub;
mod types;

pub use handler::{handle_socket, ws_handler};
pub use hub::{
    ConnId, DEFAULT_CONNECTION_BUFFER, DEFAULT_HEARTBEAT_INTERVAL, HubSettings, Outgoing,
    Registration, RelayHub,
};
pub use types::{
    AuthoritativePeerBusy, HubEvent, Inbound, NoAuthoritativePeer, ProtocolError, Role,
};
