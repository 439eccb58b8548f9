//! Session types: the server's record of one connected peer.
//!
//! A session tracks:
//! - WHO the peer is (`ClientId`, assigned by the registry)
//! - WHEN it connected and whether it came in over TLS
//! - WHERE its outbound frames go (the [`Outbox`])
//! - WHAT lifecycle state it is in

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use switchboard_protocol::{ClientId, ClientInfo, Timestamp};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::SessionError;

/// The write side of a session: a bounded queue drained by the
/// connection's writer task.
///
/// Frames are shared (`Arc<str>`) so a broadcast encodes once and every
/// recipient gets the same allocation.
pub type Outbox = mpsc::Sender<Arc<str>>;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a session.
///
/// ```text
/// Connecting ──→ Open ──→ Closing ──→ Closed
/// ```
///
/// - **Connecting**: handshake in progress. Never visible outside the
///   registry.
/// - **Open**: registered, receives broadcasts.
/// - **Closing**: removed from the registry; the transport is draining.
/// - **Closed**: transport released. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    /// The only state reachable from this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Open),
            Self::Open => Some(Self::Closing),
            Self::Closing => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One peer connection, as seen by the registry.
///
/// A session never touches the socket itself. It holds the peer's
/// identity (`id`, `connected_at`, `secure`), its lifecycle state, and the
/// [`Outbox`] sender; the connection task owns the transport and runs a
/// writer that drains the other end of that outbox.
///
/// ## Who owns what
///
/// ```text
/// Registry ──owns──→ Session ──holds──→ Outbox (Sender)
///                                          │
///                                          ▼
/// connection task ──owns──→ writer ──drains──→ Receiver ──→ socket
/// ```
///
/// Removing the session from the registry drops the sender, so the writer
/// sees its queue end, flushes what is left, and closes the socket. That
/// is the only way a session's transport is released.
#[derive(Debug)]
pub struct Session {
    id: ClientId,
    connected_at: Timestamp,
    secure: bool,
    state: SessionState,
    /// Dropped on `Open → Closing`, which lets the writer task drain and
    /// finish.
    outbox: Option<Outbox>,
}

impl Session {
    /// Creates a session in `Connecting`.
    pub(crate) fn new(id: ClientId, secure: bool, outbox: Outbox) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            secure,
            state: SessionState::Connecting,
            outbox: Some(outbox),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// Whether the peer connected over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The roster entry for this session.
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            connected_at: self.connected_at,
        }
    }

    /// Moves to `target`, enforcing the lifecycle order.
    pub fn transition(&mut self, target: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        tracing::trace!(client_id = %self.id, from = %self.state, to = %target, "session transition");
        self.state = target;
        if target == SessionState::Closing {
            self.outbox = None;
        }
        Ok(())
    }

    /// Marks the transport as fully released.
    pub fn finish_close(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Closed)
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    /// - [`SessionError::NotOpen`]: the session is not `Open`
    /// - [`SessionError::OutboxFull`]: the peer is not draining its queue
    /// - [`SessionError::OutboxClosed`]: the writer task has stopped
    pub fn enqueue(&self, frame: Arc<str>) -> Result<(), SessionError> {
        let outbox = match (&self.outbox, self.state) {
            (Some(outbox), SessionState::Open) => outbox,
            _ => return Err(SessionError::NotOpen(self.id.clone())),
        };
        outbox.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::OutboxFull(self.id.clone()),
            TrySendError::Closed(_) => SessionError::OutboxClosed(self.id.clone()),
        })
    }
}
