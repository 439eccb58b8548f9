//! Error types for the connection manager.

use switchboard_protocol::{ClientId, ErrorKind, ProtocolError};
use switchboard_transport::TransportError;

use crate::{ConfigError, Mode};

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager)
/// commands.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connect request was rejected before dialing.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `connect` was called while sockets are already active.
    #[error("already connected; disconnect first")]
    AlreadyConnected,

    /// No socket has announced this peer.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// The peer is known but the socket it was announced on is not open.
    #[error("{mode} socket for {client_id} is not open")]
    SocketNotOpen { client_id: ClientId, mode: Mode },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Where this error falls in the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::AlreadyConnected => ErrorKind::Config,
            Self::UnknownClient(_) | Self::SocketNotOpen { .. } => ErrorKind::Routing,
            Self::Protocol(_) => ErrorKind::Decode,
            Self::Transport(_) => ErrorKind::Connection,
        }
    }
}
