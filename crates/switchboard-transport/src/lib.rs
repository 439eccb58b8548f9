//! Transport abstraction layer for Switchboard.
//!
//! Provides the [`Transport`], [`Handshake`], [`Connection`] and
//! [`Connector`] traits that abstract over how peers reach each other. Frames are UTF-8 text; the
//! layers above decide what the text means.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`,
//!   with optional TLS via `tokio-rustls`

#![allow(async_fn_in_trait)]

mod error;
mod tls;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use tls::TlsCredentials;
#[cfg(feature = "websocket")]
pub use websocket::{
    PendingWebSocket, WebSocketConnection, WebSocketConnector, WebSocketTransport,
};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// Accepting is split in two so one listener can admit many peers at once:
/// [`accept`](Transport::accept) hands back a [`Handshake`] as soon as a
/// peer reaches the socket, and the caller completes that handshake
/// wherever it likes, typically in the peer's own task. A peer that opens
/// a socket and then goes quiet only ever stalls its own handshake.
///
/// Dropping the transport closes the listener.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;
    /// A peer that has been accepted but not yet upgraded.
    type Pending: Handshake<Connection = Self::Connection, Error = Self::Error>;

    /// Waits for the next peer to reach the listener.
    ///
    /// Resolves before any TLS or WebSocket handshake runs.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;
}

/// The remaining handshake of an accepted peer.
///
/// Completing it is bounded by a timeout, so a peer that never finishes
/// its upgrade fails instead of hanging.
pub trait Handshake: Send + 'static {
    /// The connection produced once the handshake succeeds.
    type Connection: Connection;
    /// The error type for a failed handshake.
    type Error: std::error::Error + Send + Sync;

    /// Runs the handshake to completion.
    fn complete(self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single full-duplex connection carrying text frames.
///
/// Sending and receiving are independent: a task blocked in
/// [`recv`](Connection::recv) does not hold up a concurrent
/// [`send`](Connection::send).
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text frame to the remote peer.
    fn send(&self, text: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns `true` if the connection runs over TLS.
    fn is_secure(&self) -> bool;
}

/// Opens outbound connections to an endpoint URL.
///
/// This is the dialing half the connection manager depends on. The
/// WebSocket implementation handles `ws://` and `wss://`; tests use a
/// scripted connector so reconnection can be driven without a network.
///
/// For `wss://` the supplied [`TlsCredentials`] are the trust root: the
/// server must present that certificate chain.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection<Error = TransportError>;

    /// Dials `url`. Secure (`wss://`) endpoints need `tls`.
    fn connect(
        &self,
        url: &str,
        tls: Option<&TlsCredentials>,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}
