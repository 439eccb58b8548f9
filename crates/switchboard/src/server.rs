//! `SwitchboardServer` builder and server loop.
//!
//! This is the entry point for running a Switchboard relay. It ties
//! together all the layers: transport → protocol → session → relay.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use switchboard_protocol::{ClientInfo, ErrorEvent, ErrorKind, JsonCodec};
use switchboard_session::ServerEvent;
use switchboard_transport::{PendingWebSocket, TlsCredentials, Transport, WebSocketTransport};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::config::{DEFAULT_OUTBOX_CAPACITY, ServerConfig};
use crate::handler::handle_incoming;
use crate::{Relay, RelayPolicy, SwitchboardError};

/// How long shutdown waits for connection tasks to flush and close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Connections accepted but not yet picked up by the server loop.
const ACCEPT_BACKLOG: usize = 128;

/// Builder for configuring and starting a Switchboard server.
///
/// # Example
///
/// ```rust,no_run
/// use switchboard::prelude::*;
///
/// # async fn start() -> Result<(), SwitchboardError> {
/// let server = SwitchboardServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct SwitchboardServerBuilder {
    bind_addr: String,
    secure: Option<(String, TlsCredentials)>,
    policy: RelayPolicy,
    outbox_capacity: usize,
}

impl SwitchboardServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            secure: None,
            policy: RelayPolicy::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    /// Starts from a [`ServerConfig`], reading TLS credentials from disk if
    /// the config names them.
    pub fn from_config(config: &ServerConfig) -> Result<Self, SwitchboardError> {
        let mut builder = Self::new()
            .bind(&config.plain_addr())
            .relay_policy(config.relay)
            .outbox_capacity(config.outbox_capacity);
        if let Some(paths) = &config.tls {
            builder = builder.bind_tls(&config.secure_addr(), paths.load()?);
        }
        Ok(builder)
    }

    /// Sets the address of the plain (`ws://`) listener.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Adds a secure (`wss://`) listener presenting `credentials`.
    pub fn bind_tls(mut self, addr: &str, credentials: TlsCredentials) -> Self {
        self.secure = Some((addr.to_string(), credentials));
        self
    }

    /// Sets who receives relayed chat.
    pub fn relay_policy(mut self, policy: RelayPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the per-session outbound queue depth (at least 1).
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Binds the listeners.
    ///
    /// # Errors
    /// A port that cannot be bound yields an error whose
    /// [`is_bind`](SwitchboardError::is_bind) is `true`; unusable TLS
    /// credentials yield a transport error.
    pub async fn build(self) -> Result<SwitchboardServer, SwitchboardError> {
        let plain = WebSocketTransport::bind(&self.bind_addr).await?;
        let secure = match &self.secure {
            Some((addr, credentials)) => Some(WebSocketTransport::bind_tls(addr, credentials).await?),
            None => None,
        };

        Ok(SwitchboardServer {
            plain,
            secure,
            relay: Arc::new(Relay::new(self.policy)),
            outbox_capacity: self.outbox_capacity,
        })
    }
}

impl Default for SwitchboardServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Switchboard server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct SwitchboardServer {
    plain: WebSocketTransport,
    secure: Option<WebSocketTransport>,
    relay: Arc<Relay<JsonCodec>>,
    outbox_capacity: usize,
}

impl SwitchboardServer {
    /// Creates a new builder.
    pub fn builder() -> SwitchboardServerBuilder {
        SwitchboardServerBuilder::new()
    }

    /// Returns the local address of the plain listener.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.plain.local_addr()
    }

    /// Returns the local address of the secure listener, if there is one.
    pub fn secure_addr(&self) -> Option<SocketAddr> {
        self.secure.as_ref().and_then(|t| t.local_addr().ok())
    }

    /// Subscribes to presence, message and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.relay.subscribe()
    }

    /// A handle to the relay, for roster queries while the server runs.
    pub fn relay(&self) -> Arc<Relay<JsonCodec>> {
        Arc::clone(&self.relay)
    }

    /// The current roster.
    pub async fn snapshot(&self) -> Vec<ClientInfo> {
        self.relay.snapshot().await
    }

    /// Runs the accept loops until the process is terminated.
    pub async fn run(self) -> Result<(), SwitchboardError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loops until `shutdown` resolves, then closes every
    /// session and waits for connection tasks to finish.
    ///
    /// # Concurrency
    ///
    /// ```text
    /// accept_loop (plain) ──┐
    ///                       ├─ mpsc ─→ server loop ─→ one task per peer:
    /// accept_loop (secure) ─┘                         handshake → admit → read
    /// ```
    ///
    /// The accept loops only take TCP connections off the listeners. The
    /// TLS/WebSocket handshake runs in the peer's own task under a
    /// timeout, so a peer that connects and then goes quiet delays nobody
    /// else on either listener.
    ///
    /// # Shutdown
    ///
    /// Once `shutdown` resolves the listeners are dropped, every session is
    /// released without departure broadcasts, and connection tasks get a
    /// grace period to flush and close before they are aborted.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), SwitchboardError> {
        let Self {
            plain,
            secure,
            relay,
            outbox_capacity,
        } = self;
        tokio::pin!(shutdown);

        tracing::info!(
            plain = ?plain.local_addr().ok(),
            secure = ?secure.as_ref().and_then(|t| t.local_addr().ok()),
            "Switchboard server running"
        );

        let (accepted_tx, mut accepted_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let mut listeners = JoinSet::new();
        listeners.spawn(accept_loop(plain, accepted_tx.clone(), Arc::clone(&relay)));
        if let Some(secure) = secure {
            listeners.spawn(accept_loop(secure, accepted_tx, Arc::clone(&relay)));
        }

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(pending) = accepted_rx.recv() => {
                    let relay = Arc::clone(&relay);
                    connections.spawn(async move {
                        if let Err(e) = handle_incoming(pending, relay, outbox_capacity).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "connection task panicked");
                    }
                }
            }
        }

        tracing::info!("Switchboard server shutting down");
        listeners.shutdown().await;
        let released = relay.teardown().await;

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!(remaining = connections.len(), "aborting lingering connections");
            connections.shutdown().await;
        }

        for mut session in released {
            if let Err(e) = session.finish_close() {
                tracing::trace!(client_id = %session.id(), error = %e, "session already closed");
            }
        }
        tracing::info!("Switchboard server stopped");
        Ok(())
    }
}

/// Takes peers off one listener and hands them to the server loop.
///
/// Only the TCP accept happens here; the handshake is left to the peer's
/// task. Accept failures are reported and do not stop the listener. The
/// listener closes when this task is aborted and the transport dropped.
async fn accept_loop(
    mut transport: WebSocketTransport,
    accepted: mpsc::Sender<PendingWebSocket>,
    relay: Arc<Relay<JsonCodec>>,
) {
    let secure = transport.is_secure();
    loop {
        match transport.accept().await {
            Ok(pending) => {
                if accepted.send(pending).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(secure, error = %e, "accept failed");
                relay.emit(ServerEvent::Error(ErrorEvent::new(
                    ErrorKind::Connection,
                    e.to_string(),
                )));
            }
        }
    }
}
