//! Unified error type for the Switchboard server.

use switchboard_protocol::{ErrorKind, ProtocolError};
use switchboard_session::SessionError;
use switchboard_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `switchboard` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant auto-generates `From` impls, so the `?` operator converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SwitchboardError {
    /// A transport-level error (bind, accept, send, recv, TLS).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (lifecycle, outbox).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Rejected server configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SwitchboardError {
    /// Where this error falls in the shared error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::BindFailed { .. }) => ErrorKind::Bind,
            Self::Transport(_) | Self::Session(_) => ErrorKind::Connection,
            Self::Protocol(_) => ErrorKind::Decode,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns `true` if a listening port could not be obtained. The
    /// server cannot start in that case.
    pub fn is_bind(&self) -> bool {
        self.kind() == ErrorKind::Bind
    }
}

#[cfg(test)]
mod tests {
    use switchboard_protocol::ClientId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let sb_err: SwitchboardError = err.into();
        assert!(matches!(sb_err, SwitchboardError::Transport(_)));
        assert!(sb_err.to_string().contains("gone"));
        assert_eq!(sb_err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let sb_err: SwitchboardError = err.into();
        assert!(matches!(sb_err, SwitchboardError::Protocol(_)));
        assert_eq!(sb_err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(ClientId::new("client-x"));
        let sb_err: SwitchboardError = err.into();
        assert!(matches!(sb_err, SwitchboardError::Session(_)));
    }

    #[test]
    fn test_from_config_error() {
        let sb_err: SwitchboardError = ConfigError::IncompleteTls.into();
        assert_eq!(sb_err.kind(), ErrorKind::Config);
        assert!(!sb_err.is_bind());
    }

    #[test]
    fn test_is_bind_only_for_bind_failures() {
        let err = TransportError::BindFailed {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let sb_err: SwitchboardError = err.into();
        assert!(sb_err.is_bind());
        assert!(sb_err.to_string().contains("0.0.0.0:80"));
    }
}
