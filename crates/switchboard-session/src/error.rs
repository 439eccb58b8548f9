//! Error types for the session layer.

use switchboard_protocol::{ClientId, ProtocolError};

use crate::SessionState;

/// Errors that can occur while managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session lifecycle does not allow this transition.
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// No live session has this id.
    #[error("no session for {0}")]
    NotFound(ClientId),

    /// The session is not `Open`, so nothing can be written to it.
    #[error("session {0} is not open")]
    NotOpen(ClientId),

    /// The session's outbound queue is full; the peer is not keeping up.
    #[error("outbox of {0} is full")]
    OutboxFull(ClientId),

    /// The session's writer has gone away.
    #[error("outbox of {0} is closed")]
    OutboxClosed(ClientId),

    /// The envelope could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
