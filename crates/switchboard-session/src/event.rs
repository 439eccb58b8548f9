//! Events the server side publishes for the presentation layer.

use switchboard_protocol::{ClientId, ClientInfo, ErrorEvent, Timestamp};

/// What happened on the server, in the order the registry saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A peer was registered.
    ClientConnected { client: ClientInfo, secure: bool },
    /// A peer was unregistered.
    ClientDisconnected { client_id: ClientId },
    /// A peer's chat content was relayed.
    Message {
        client_id: ClientId,
        content: String,
        timestamp: Timestamp,
    },
    /// A non-fatal error.
    Error(ErrorEvent),
}
