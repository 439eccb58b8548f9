//! Presence and message relay.
//!
//! The relay turns registry lifecycle and inbound chat into outbound
//! envelopes:
//!
//! ```text
//! admit(S)        → client_connected{S}  to everyone but S
//!                 → clients_list         to S (roster before S joined)
//! depart(S)       → client_disconnected  to everyone left
//! relay(S, text)  → message{S, text}     to everyone but S (by default)
//! bad frame       → DecodeError event, S stays registered
//! ```
//!
//! All registry mutation and fan-out happens under one lock, so every peer
//! observes joins, leaves and messages in the same order.

use std::sync::Arc;

use chrono::Utc;
use switchboard_protocol::{
    ClientId, ClientInfo, ClientMessage, Codec, Envelope, ErrorEvent, ErrorKind, JsonCodec,
};
use switchboard_session::{Outbox, Registry, ServerEvent, Session, SessionError};
use tokio::sync::{Mutex, broadcast};

/// Who receives relayed chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Send each message back to its author as well as the other peers.
    pub echo_to_sender: bool,
}

/// The server's registry plus the rules for what to tell whom.
///
/// Connection tasks never touch the [`Registry`] directly; they call
/// [`admit`](Self::admit), [`relay_frame`](Self::relay_frame) and
/// [`depart`](Self::depart), and the relay turns each call into the right
/// envelopes. Each call takes the registry lock once, so the
/// registry change and its broadcast happen as one step: a peer can never
/// see a message from someone whose `client_connected` it has not yet
/// received.
///
/// The generic `C` is the wire codec. It defaults to [`JsonCodec`]; tests
/// swap in codecs that fail on purpose.
pub struct Relay<C: Codec + Clone = JsonCodec> {
    registry: Mutex<Registry<C>>,
    events: broadcast::Sender<ServerEvent>,
    policy: RelayPolicy,
    codec: C,
}

impl Relay<JsonCodec> {
    pub fn new(policy: RelayPolicy) -> Self {
        Self::with_codec(policy, JsonCodec)
    }
}

impl<C: Codec + Clone> Relay<C> {
    pub fn with_codec(policy: RelayPolicy, codec: C) -> Self {
        let registry = Registry::with_codec(codec.clone());
        let events = registry.event_sender();
        Self {
            registry: Mutex::new(registry),
            events,
            policy,
            codec,
        }
    }

    pub fn policy(&self) -> RelayPolicy {
        self.policy
    }

    /// Subscribes to presence, message and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Publishes an event that did not come from the registry itself.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// Registers a peer whose handshake just completed and announces it.
    ///
    /// The roster the newcomer receives is taken *before* it registers, so
    /// a peer never appears in its own `clients_list`. Everyone already
    /// connected hears `client_connected`; the newcomer does not.
    ///
    /// # Errors
    /// Only if the announcement cannot be encoded. The peer is then removed
    /// again, so a failed admission never leaves a session behind.
    /// Delivery failures to individual peers are reported as events.
    pub async fn admit(&self, secure: bool, outbox: Outbox) -> Result<ClientId, SessionError> {
        let mut registry = self.registry.lock().await;

        let roster = registry.snapshot();
        let id = registry.register(secure, outbox);
        let client = registry
            .get(&id)
            .map(Session::info)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        let hello = Envelope::ClientConnected {
            client: client.clone(),
        };
        if let Err(e) = registry.broadcast(&hello, Some(&id)) {
            // Nobody heard of the peer yet, so it leaves without a goodbye.
            registry.unregister(&id);
            return Err(e);
        }

        if let Err(e) = registry.send_to(&id, &Envelope::ClientsList { clients: roster }) {
            tracing::warn!(client_id = %id, error = %e, "failed to deliver roster");
            registry.emit(ServerEvent::Error(
                ErrorEvent::new(ErrorKind::Connection, e.to_string()).for_client(id.clone()),
            ));
        }

        registry.emit(ServerEvent::ClientConnected { client, secure });
        Ok(id)
    }

    /// Removes a peer and tells the rest of the roster.
    ///
    /// Returns the released session (in `Closing`), or `None` if the peer
    /// was already gone, in which case nothing is broadcast.
    pub async fn depart(&self, id: &ClientId) -> Option<Session> {
        let mut registry = self.registry.lock().await;
        let session = registry.unregister(id)?;

        let goodbye = Envelope::ClientDisconnected {
            client_id: id.clone(),
        };
        if let Err(e) = registry.broadcast(&goodbye, None) {
            tracing::error!(client_id = %id, error = %e, "failed to announce departure");
        }
        registry.emit(ServerEvent::ClientDisconnected {
            client_id: id.clone(),
        });
        Some(session)
    }

    /// Handles one inbound frame from `from`.
    ///
    /// Frames that are not a valid [`ClientMessage`] are dropped and
    /// reported; the sender stays connected.
    pub async fn relay_frame(&self, from: &ClientId, frame: &[u8]) {
        let content = match self.codec.decode_valid::<ClientMessage>(frame) {
            Ok(ClientMessage::Message { content, .. }) => content,
            Err(e) => {
                self.reject_frame(from, &e);
                return;
            }
        };
        if let Err(e) = self.relay_message(from, content).await {
            tracing::error!(client_id = %from, error = %e, "failed to relay message");
        }
    }

    /// Relays chat content from `from` to the roster.
    ///
    /// # Errors
    /// Only if the envelope cannot be encoded.
    pub async fn relay_message(&self, from: &ClientId, content: String) -> Result<(), SessionError> {
        let timestamp = Utc::now();
        let envelope = Envelope::Message {
            client_id: from.clone(),
            content,
            timestamp,
        };
        let exclude = (!self.policy.echo_to_sender).then_some(from);

        let registry = self.registry.lock().await;
        registry.broadcast(&envelope, exclude)?;

        if let Envelope::Message { content, .. } = envelope {
            registry.emit(ServerEvent::Message {
                client_id: from.clone(),
                content,
                timestamp,
            });
        }
        Ok(())
    }

    fn reject_frame(&self, from: &ClientId, error: &switchboard_protocol::ProtocolError) {
        tracing::debug!(client_id = %from, error = %error, "dropping malformed frame");
        self.emit(ServerEvent::Error(
            ErrorEvent::new(ErrorKind::Decode, error.to_string()).for_client(from.clone()),
        ));
    }

    /// The current roster in registration order.
    pub async fn snapshot(&self) -> Vec<ClientInfo> {
        self.registry.lock().await.snapshot()
    }

    /// Number of live peers.
    pub async fn len(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Returns `true` if no peer is connected.
    pub async fn is_empty(&self) -> bool {
        self.registry.lock().await.is_empty()
    }

    /// Releases every session without announcing departures.
    pub async fn teardown(&self) -> Vec<Session> {
        self.registry.lock().await.teardown()
    }
}

impl Default for Relay<JsonCodec> {
    fn default() -> Self {
        Self::new(RelayPolicy::default())
    }
}

/// Shared handle used by connection tasks.
pub(crate) type SharedRelay<C> = Arc<Relay<C>>;
