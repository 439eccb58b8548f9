/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The listening socket could not be obtained.
    #[error("bind {addr} failed: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection or completing its handshake failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Dialing a remote endpoint failed.
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// The endpoint URL could not be used.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// TLS credentials were missing or could not be loaded.
    #[error("tls: {0}")]
    Tls(String),
}
