//! Structured error events surfaced to the presentation layer.
//!
//! Neither the server nor the connection manager lets a non-fatal error
//! disappear: each one becomes an [`ErrorEvent`] on the owning side's
//! event stream, and is logged.

use std::fmt;

use serde::Serialize;

use crate::ClientId;

/// Error taxonomy shared by both sides of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An inbound frame was not a valid, recognized message.
    Decode,
    /// Transport-level failure on an established or dialing socket.
    Connection,
    /// Rejected configuration.
    Config,
    /// A send targeted an unknown peer or a socket that is not open.
    Routing,
    /// The listening port could not be obtained.
    Bind,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decode => "DecodeError",
            Self::Connection => "ConnectionError",
            Self::Config => "ConfigError",
            Self::Routing => "RoutingError",
            Self::Bind => "BindError",
        };
        f.write_str(name)
    }
}

/// One reported error: what kind, a human-readable detail, and the peer it
/// concerns if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl ErrorEvent {
    /// An error not tied to a particular peer.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            client_id: None,
        }
    }

    /// Tags the event with the peer it concerns.
    pub fn for_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client_id {
            Some(id) => write!(f, "{} [{id}]: {}", self.kind, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}
