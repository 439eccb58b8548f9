//! What the manager tells the presentation layer.

use std::fmt;
use std::time::Duration;

use switchboard_protocol::{ClientId, ClientInfo, ErrorEvent, Timestamp};

use crate::Mode;

/// Lifecycle of one socket.
///
/// ```text
/// Idle ──→ Connecting ──→ Open
///              ↑            │ (drop / error)
///              │            ↓
///              └──── Reconnecting{n} ──→ Failed   (n > max_attempts)
/// ```
///
/// `disconnect()` returns every state to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    #[default]
    Idle,
    Connecting,
    Open,
    /// Waiting before retry number `attempt`.
    Reconnecting { attempt: u32 },
    /// Gave up. Only `disconnect()` leaves this state.
    Failed,
}

impl SocketState {
    pub fn is_open(self) -> bool {
        self == SocketState::Open
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting({attempt})"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// One event on the manager's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    SocketOpened { mode: Mode },
    /// The socket dropped without being asked to.
    SocketClosed { mode: Mode },
    Reconnecting {
        mode: Mode,
        attempt: u32,
        delay: Duration,
    },
    /// Reconnection gave up.
    SocketFailed { mode: Mode },

    /// A peer joined, as announced on the socket with the given security.
    ClientConnected { client: ClientInfo, secure: bool },
    ClientDisconnected { client_id: ClientId },
    /// The roster a socket received when it opened.
    ClientsList {
        clients: Vec<ClientInfo>,
        secure: bool,
    },
    Message {
        client_id: ClientId,
        content: String,
        timestamp: Timestamp,
    },

    Error(ErrorEvent),
    /// `disconnect()` finished; every socket is `Idle`.
    Disconnected,
}
