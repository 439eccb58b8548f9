//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Both plain and TLS streams are boxed behind one stream type so the rest
//! of the workspace deals with a single [`WebSocketConnection`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;

use crate::{
    Connection, ConnectionId, Connector, Handshake, TlsCredentials, Transport, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on the TCP + TLS + WebSocket handshake of one peer.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

type WsStream = tokio_tungstenite::WebSocketStream<Box<dyn IoStream>>;

fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

fn io_error(kind: std::io::ErrorKind, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(kind, e.to_string())
}

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// When bound with [`bind_tls`](Self::bind_tls) every accepted stream is
/// wrapped in TLS before the WebSocket handshake.
pub struct WebSocketTransport {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl WebSocketTransport {
    /// Binds a plain (`ws://`) transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            tls: None,
        })
    }

    /// Binds a secure (`wss://`) transport presenting `credentials`.
    pub async fn bind_tls(
        addr: &str,
        credentials: &TlsCredentials,
    ) -> Result<Self, TransportError> {
        let acceptor = TlsAcceptor::from(credentials.server_config()?);
        let mut transport = Self::bind(addr).await?;
        transport.tls = Some(acceptor);
        tracing::info!(addr, "TLS enabled on transport");
        Ok(transport)
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns `true` if accepted connections run over TLS.
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;
    type Pending = PendingWebSocket;

    async fn accept(&mut self) -> Result<Self::Pending, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::trace!(%addr, secure = self.is_secure(), "peer reached listener");
        Ok(PendingWebSocket {
            stream,
            addr,
            tls: self.tls.clone(),
        })
    }
}

/// A TCP peer accepted by a [`WebSocketTransport`] whose TLS and WebSocket
/// upgrade has not run yet.
///
/// [`complete`](Handshake::complete) performs the upgrade under
/// `HANDSHAKE_TIMEOUT`; run it in the peer's own task so the listener can
/// go straight back to accepting.
pub struct PendingWebSocket {
    stream: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl PendingWebSocket {
    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn upgrade(self) -> Result<WebSocketConnection, TransportError> {
        let secure = self.tls.is_some();
        let stream: Box<dyn IoStream> = match self.tls {
            Some(acceptor) => Box::new(
                acceptor
                    .accept(self.stream)
                    .await
                    .map_err(TransportError::AcceptFailed)?,
            ),
            None => Box::new(self.stream),
        };
        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(io_error(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        Ok(WebSocketConnection::new(ws, Some(self.addr), secure))
    }
}

impl Handshake for PendingWebSocket {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn complete(self) -> Result<Self::Connection, Self::Error> {
        let addr = self.addr;
        let conn = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.upgrade())
            .await
            .map_err(|_| {
                TransportError::AcceptFailed(io_error(
                    std::io::ErrorKind::TimedOut,
                    format!("handshake with {addr} timed out"),
                ))
            })??;
        tracing::debug!(
            id = %conn.id,
            %addr,
            secure = conn.secure,
            "accepted WebSocket connection"
        );
        Ok(conn)
    }
}

/// A single WebSocket connection, plain or TLS.
///
/// The sink and stream halves are locked separately so a reader parked in
/// [`recv`](Connection::recv) never blocks writers.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    secure: bool,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn new(ws: WsStream, peer: Option<SocketAddr>, secure: bool) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: next_connection_id(),
            peer,
            secure,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// Returns the remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                TransportError::SendFailed(io_error(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(io_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Host, port and scheme of a `ws://` or `wss://` URL.
#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    secure: bool,
}

impl Endpoint {
    fn parse(url: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(url.to_string());
        let uri: Uri = url.parse().map_err(|_| invalid())?;
        let secure = match uri.scheme_str() {
            Some("ws") => false,
            Some("wss") => true,
            _ => return Err(invalid()),
        };
        let host = uri.host().ok_or_else(invalid)?;
        // `Uri::host` keeps the brackets of an IPv6 literal.
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port: uri.port_u16().unwrap_or(if secure { 443 } else { 80 }),
            secure,
        })
    }
}

/// Dials `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    async fn dial(
        url: &str,
        tls: Option<&TlsCredentials>,
    ) -> Result<WebSocketConnection, TransportError> {
        let Endpoint { host, port, secure } = Endpoint::parse(url)?;

        let failed = |reason: String| TransportError::ConnectFailed {
            url: url.to_string(),
            reason,
        };

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let peer = tcp.peer_addr().ok();

        let stream: Box<dyn IoStream> = if secure {
            let credentials = tls.ok_or_else(|| {
                TransportError::Tls(format!("{url} needs TLS credentials"))
            })?;
            let connector = TlsConnector::from(credentials.client_config()?);
            let server_name = ServerName::try_from(host.clone())
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            Box::new(
                connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| failed(e.to_string()))?,
            )
        } else {
            Box::new(tcp)
        };

        let (ws, _response) = tokio_tungstenite::client_async(url, stream)
            .await
            .map_err(|e| failed(e.to_string()))?;
        Ok(WebSocketConnection::new(ws, peer, secure))
    }
}

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(
        &self,
        url: &str,
        tls: Option<&TlsCredentials>,
    ) -> Result<Self::Connection, TransportError> {
        let conn = tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::dial(url, tls))
            .await
            .map_err(|_| TransportError::ConnectFailed {
                url: url.to_string(),
                reason: "handshake timed out".into(),
            })??;
        tracing::debug!(id = %conn.id, url, "dialed WebSocket endpoint");
        Ok(conn)
    }
}
