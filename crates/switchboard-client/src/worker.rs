//! One socket's task: dial, read, back off, dial again.

use std::sync::Arc;

use switchboard_protocol::{Codec, Envelope, ErrorEvent, ErrorKind, JsonCodec};
use switchboard_transport::{Connection, Connector, TlsCredentials, TransportError};
use tokio::sync::oneshot;

use crate::manager::{Hub, SocketOutcome};
use crate::{ConsoleEvent, Mode, ReconnectPolicy, SocketState};

/// Why a read loop ended.
enum ReadEnd {
    /// `disconnect()` asked us to stop.
    Shutdown,
    /// The server closed the socket (`None`) or it failed.
    Dropped(Option<TransportError>),
}

pub(crate) struct SocketWorker<C: Connector> {
    pub(crate) mode: Mode,
    pub(crate) url: String,
    pub(crate) tls: Option<TlsCredentials>,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) connector: Arc<C>,
    pub(crate) hub: Arc<Hub<C::Connection>>,
    pub(crate) codec: JsonCodec,
}

impl<C: Connector> SocketWorker<C> {
    /// Runs until `shutdown` fires (or its sender is dropped) or the
    /// reconnect policy gives up. The outcome of the first dial goes to
    /// `first`.
    pub(crate) async fn run(
        self,
        mut shutdown: oneshot::Receiver<()>,
        first: oneshot::Sender<SocketOutcome>,
    ) {
        let mode = self.mode;
        let mut first = Some(first);
        let mut attempt: u32 = 0;

        loop {
            self.hub.set_state(mode, SocketState::Connecting).await;
            let dialed = tokio::select! {
                _ = &mut shutdown => return,
                dialed = self.connector.connect(&self.url, self.tls.as_ref()) => dialed,
            };

            match dialed {
                Ok(link) => {
                    attempt = 0;
                    let link = Arc::new(link);
                    self.hub.opened(mode, Arc::clone(&link)).await;
                    tracing::info!(%mode, url = %self.url, "socket open");
                    self.hub.emit(ConsoleEvent::SocketOpened { mode });
                    if let Some(first) = first.take() {
                        let _ = first.send(SocketOutcome::Open);
                    }

                    match self.read_until_dropped(link.as_ref(), &mut shutdown).await {
                        ReadEnd::Shutdown => {
                            if let Err(e) = link.close().await {
                                tracing::debug!(%mode, error = %e, "close on disconnect");
                            }
                            return;
                        }
                        ReadEnd::Dropped(error) => {
                            self.hub.closed(mode).await;
                            tracing::warn!(%mode, error = ?error.as_ref().map(ToString::to_string), "socket dropped");
                            self.hub.emit(ConsoleEvent::SocketClosed { mode });
                            if let Some(e) = error {
                                self.hub
                                    .report(ErrorEvent::new(ErrorKind::Connection, e.to_string()))
                                    .await;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%mode, url = %self.url, error = %e, "dial failed");
                    if let Some(first) = first.take() {
                        let _ = first.send(SocketOutcome::Failed {
                            reason: e.to_string(),
                        });
                    }
                    self.hub
                        .report(ErrorEvent::new(ErrorKind::Connection, e.to_string()))
                        .await;
                }
            }

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                let retries = attempt - 1;
                self.hub.set_state(mode, SocketState::Failed).await;
                tracing::error!(%mode, retries, "giving up on socket");
                self.hub.emit(ConsoleEvent::SocketFailed { mode });
                self.hub
                    .report(ErrorEvent::new(
                        ErrorKind::Connection,
                        format!("{mode} socket gave up after {retries} reconnection attempts"),
                    ))
                    .await;
                return;
            };

            self.hub
                .set_state(mode, SocketState::Reconnecting { attempt })
                .await;
            tracing::info!(%mode, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            self.hub.emit(ConsoleEvent::Reconnecting {
                mode,
                attempt,
                delay,
            });

            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn read_until_dropped(
        &self,
        link: &C::Connection,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> ReadEnd {
        loop {
            tokio::select! {
                _ = &mut *shutdown => return ReadEnd::Shutdown,
                received = link.recv() => match received {
                    Ok(Some(frame)) => self.handle_frame(&frame).await,
                    Ok(None) => return ReadEnd::Dropped(None),
                    Err(e) => return ReadEnd::Dropped(Some(e)),
                },
            }
        }
    }

    /// Turns one server envelope into roster updates and a console event.
    async fn handle_frame(&self, frame: &[u8]) {
        let envelope: Envelope = match self.codec.decode_valid(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(mode = %self.mode, error = %e, "dropping malformed frame");
                self.hub
                    .report(ErrorEvent::new(ErrorKind::Decode, e.to_string()))
                    .await;
                return;
            }
        };

        let secure = self.mode.is_secure();
        let event = match envelope {
            Envelope::ClientConnected { client } => {
                self.hub.learn([&client.id], self.mode).await;
                ConsoleEvent::ClientConnected { client, secure }
            }
            Envelope::ClientDisconnected { client_id } => {
                self.hub.forget(&client_id).await;
                ConsoleEvent::ClientDisconnected { client_id }
            }
            Envelope::ClientsList { clients } => {
                self.hub
                    .learn(clients.iter().map(|c| &c.id), self.mode)
                    .await;
                ConsoleEvent::ClientsList { clients, secure }
            }
            Envelope::Message {
                client_id,
                content,
                timestamp,
            } => ConsoleEvent::Message {
                client_id,
                content,
                timestamp,
            },
        };
        self.hub.emit(event);
    }
}
