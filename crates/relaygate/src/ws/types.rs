//! Relay message types.
//!
//! Peers exchange JSON records tagged by `type`. The hub only interprets the
//! two hello messages; everything else is application traffic that is
//! wrapped and forwarded opaquely.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Role of a connection, fixed by its first hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unclassified,
    /// The realtime authoring tool (TD).
    Authoritative,
    /// A browser UI.
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Unclassified => "unclassified",
            Role::Authoritative => "authoritative",
            Role::Observer => "observer",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Peer -> Hub
// ============================================================================

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Greeting {
    #[serde(rename = "td.hello")]
    Authoritative,
    #[serde(rename = "ui.hello")]
    Observer,
    #[serde(other)]
    Other,
}

/// A frame received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `td.hello`
    AuthoritativeHello,
    /// `ui.hello`
    ObserverHello,
    /// Any other JSON value; forwarded without interpretation.
    Application(Value),
}

impl Inbound {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;

        let greeting = if value.is_object() {
            Greeting::deserialize(&value).unwrap_or(Greeting::Other)
        } else {
            Greeting::Other
        };

        Ok(match greeting {
            Greeting::Authoritative => Inbound::AuthoritativeHello,
            Greeting::Observer => Inbound::ObserverHello,
            Greeting::Other => Inbound::Application(value),
        })
    }
}

// ============================================================================
// Hub -> Peer
// ============================================================================

/// Envelopes the hub sends to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    /// Authoritative classification accepted.
    #[serde(rename = "td.ack")]
    TdAck,

    /// Observer classification accepted.
    #[serde(rename = "ui.ack")]
    UiAck {
        #[serde(rename = "tdConnected")]
        td_connected: bool,
    },

    /// Authoritative presence changed.
    #[serde(rename = "td.status")]
    TdStatus { connected: bool },

    /// Message from the authoritative peer, sent to every observer.
    #[serde(rename = "td.event")]
    TdEvent { payload: Value },

    /// Message from an observer, sent to the authoritative peer.
    #[serde(rename = "ui.toTd")]
    UiToTd { payload: Value },

    /// The observer's message was forwarded.
    #[serde(rename = "ok")]
    Ok,

    #[serde(rename = "error")]
    Error { msg: String },
}

impl HubEvent {
    pub fn error(msg: impl fmt::Display) -> Self {
        Self::Error {
            msg: msg.to_string(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Malformed or out-of-order input on a relay connection.
///
/// Reported to the sender; the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Not identified: send td.hello or ui.hello first")]
    NotIdentified,

    #[error("Already identified as {0}")]
    AlreadyIdentified(Role),
}

/// An observer tried to reach the authoritative peer while none is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("TD not connected")]
pub struct NoAuthoritativePeer;

/// The authoritative peer's send buffer is full; the message was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("TD busy, message dropped")]
pub struct AuthoritativePeerBusy;
