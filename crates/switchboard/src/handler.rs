//! Per-connection handler: handshake, admission, read loop, departure.
//!
//! Each peer that reaches a listener gets its own Tokio task running this
//! handler. The flow is:
//!   0. Complete the TLS/WebSocket handshake (bounded by a timeout). A
//!      peer that stalls here only holds up its own task
//!   1. Spawn the writer task that drains the session's outbox
//!   2. Admit the peer → it gets an id and the roster
//!   3. Loop: receive frames → relay them
//!   4. Depart → the roster is told, the outbox closes, the writer
//!      flushes and closes the transport

use std::sync::Arc;

use switchboard_protocol::{ClientId, Codec, ErrorEvent, ErrorKind};
use switchboard_session::{ServerEvent, Session};
use switchboard_transport::{Connection, Handshake};
use tokio::sync::mpsc;

use crate::SwitchboardError;
use crate::relay::SharedRelay;

/// Owns a peer's place on the roster while its read loop runs.
///
/// The read loop ends in [`depart`](Self::depart), which announces
/// `client_disconnected` and hands back the released session. If the
/// connection task is instead aborted mid-read (server shutdown gave up
/// waiting, or the task panicked) the guard is dropped armed, and `Drop`
/// spawns the same departure on the runtime. The remaining peers hear
/// about the leave either way, and a session is never left on the roster
/// without a task reading from it.
struct DepartGuard<C: Codec + Clone> {
    client_id: ClientId,
    relay: Option<SharedRelay<C>>,
}

impl<C: Codec + Clone> DepartGuard<C> {
    async fn depart(mut self) -> Option<Session> {
        let relay = self.relay.take()?;
        relay.depart(&self.client_id).await
    }
}

impl<C: Codec + Clone> Drop for DepartGuard<C> {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            let client_id = self.client_id.clone();
            tokio::spawn(async move {
                relay.depart(&client_id).await;
            });
        }
    }
}

/// Completes a peer's handshake, then runs it with [`handle_connection`].
///
/// A failed or timed-out handshake is reported as a `Connection` error
/// event; the peer never reaches the roster.
pub(crate) async fn handle_incoming<P, C>(
    pending: P,
    relay: SharedRelay<C>,
    outbox_capacity: usize,
) -> Result<(), SwitchboardError>
where
    P: Handshake,
    SwitchboardError: From<P::Error>,
    C: Codec + Clone,
{
    let conn = match pending.complete().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "handshake failed");
            relay.emit(ServerEvent::Error(ErrorEvent::new(
                ErrorKind::Connection,
                e.to_string(),
            )));
            return Err(e.into());
        }
    };
    handle_connection(conn, relay, outbox_capacity).await
}

/// Handles a single connection from handshake completion to close.
pub(crate) async fn handle_connection<T, C>(
    conn: T,
    relay: SharedRelay<C>,
    outbox_capacity: usize,
) -> Result<(), SwitchboardError>
where
    T: Connection,
    C: Codec + Clone,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();

    let (outbox, inbox) = mpsc::channel(outbox_capacity);
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), inbox));

    let client_id = relay.admit(conn.is_secure(), outbox).await?;
    tracing::info!(%conn_id, %client_id, secure = conn.is_secure(), "peer connected");

    let guard = DepartGuard {
        client_id: client_id.clone(),
        relay: Some(Arc::clone(&relay)),
    };

    loop {
        match conn.recv().await {
            Ok(Some(frame)) => relay.relay_frame(&client_id, &frame).await,
            Ok(None) => {
                tracing::info!(%client_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%client_id, error = %e, "recv error");
                relay.emit(ServerEvent::Error(
                    ErrorEvent::new(ErrorKind::Connection, e.to_string())
                        .for_client(client_id.clone()),
                ));
                break;
            }
        }
    }

    // Open → Closing: drops the outbox, so the writer drains and exits.
    let session = guard.depart().await;

    if let Err(e) = writer.await {
        tracing::warn!(%client_id, error = %e, "writer task failed");
    }
    if let Some(mut session) = session {
        session.finish_close()?;
    }
    tracing::debug!(%client_id, "session closed");
    Ok(())
}

/// Drains a session's outbox onto the wire, then closes the transport.
///
/// Ends when every sender is gone (the session left the registry) or the
/// peer stops accepting frames.
async fn write_loop<T: Connection>(conn: Arc<T>, mut inbox: mpsc::Receiver<Arc<str>>) {
    while let Some(frame) = inbox.recv().await {
        if let Err(e) = conn.send(&frame).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed, stopping writer");
            break;
        }
    }
    if let Err(e) = conn.close().await {
        tracing::trace!(conn_id = %conn.id(), error = %e, "close after writer exit");
    }
}
