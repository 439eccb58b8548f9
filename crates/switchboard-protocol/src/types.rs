//! Wire types for Switchboard.
//!
//! Every frame on the wire is one JSON object. Server → peer frames are
//! [`Envelope`]s; peer → server frames are [`ClientMessage`]s. Both are
//! internally tagged on a `"type"` field with snake_case kind names and
//! camelCase field names, which is the shape browser peers already speak:
//!
//! ```text
//! {"type":"client_connected","client":{"id":"client-k3j9x0a1b","connectedAt":"..."}}
//! {"type":"client_disconnected","clientId":"client-k3j9x0a1b"}
//! {"type":"clients_list","clients":[...]}
//! {"type":"message","clientId":"client-k3j9x0a1b","content":"hi","timestamp":"..."}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Wall-clock instant carried on the wire as an RFC 3339 UTC string.
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque identifier the server assigns to a connected peer.
///
/// Serialized as a bare string. Peers must treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Roster entry: who is connected and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ClientId,
    pub connected_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A server → peer frame.
///
/// Exactly one kind per envelope; serde refuses frames that lack a field
/// their kind requires and ignores fields it does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// A peer joined the roster.
    ClientConnected { client: ClientInfo },

    /// A peer left the roster.
    ClientDisconnected { client_id: ClientId },

    /// The roster as it stood when the receiving peer joined.
    ClientsList { clients: Vec<ClientInfo> },

    /// Chat content relayed from `client_id`.
    Message {
        client_id: ClientId,
        content: String,
        timestamp: Timestamp,
    },
}

impl Envelope {
    /// The wire name of this envelope's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::ClientsList { .. } => "clients_list",
            Self::Message { .. } => "message",
        }
    }
}

// ---------------------------------------------------------------------------
// ClientMessage
// ---------------------------------------------------------------------------

/// A peer → server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Chat content to relay to the roster.
    ///
    /// `client_id` is an addressing hint set by operator consoles; the
    /// server relays to the whole roster either way.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks that go beyond what serde enforces structurally.
pub trait Validate {
    /// Returns `ProtocolError::InvalidMessage` if the value breaks a
    /// protocol rule.
    fn validate(&self) -> Result<(), ProtocolError>;
}

fn require_id(id: &ClientId, field: &str) -> Result<(), ProtocolError> {
    if id.as_str().is_empty() {
        return Err(ProtocolError::InvalidMessage(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

impl Validate for Envelope {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::ClientConnected { client } => require_id(&client.id, "client.id"),
            Self::ClientDisconnected { client_id } => require_id(client_id, "clientId"),
            Self::ClientsList { clients } => clients
                .iter()
                .try_for_each(|c| require_id(&c.id, "clients[].id")),
            Self::Message { client_id, .. } => require_id(client_id, "clientId"),
        }
    }
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::Message {
                client_id: Some(id),
                ..
            } => require_id(id, "clientId"),
            Self::Message { client_id: None, .. } => Ok(()),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
