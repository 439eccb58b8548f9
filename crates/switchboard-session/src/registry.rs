//! The registry: the authoritative set of live sessions.
//!
//! It's responsible for:
//! - Assigning each new peer a unique [`ClientId`]
//! - Keeping the roster in registration order
//! - Fanning envelopes out to every session's outbox
//! - Publishing [`ServerEvent`]s, including per-session delivery failures
//!
//! # Concurrency note
//!
//! `Registry` is NOT thread-safe by itself. The server wraps it in a single
//! `tokio::sync::Mutex`, which serializes registration, removal and
//! broadcast against each other. Broadcast never awaits: every write is a
//! `try_send` into a bounded per-session queue, so holding the lock across
//! a fan-out costs no I/O and a slow peer cannot stall the others.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use switchboard_protocol::{
    ClientId, ClientInfo, Codec, Envelope, ErrorEvent, ErrorKind, JsonCodec,
};
use tokio::sync::broadcast;

use crate::{Outbox, ServerEvent, Session, SessionError, SessionState};

/// How many events a lagging subscriber may fall behind before it starts
/// missing them.
const EVENT_CAPACITY: usize = 1024;

const ID_PREFIX: &str = "client-";
const ID_LEN: usize = 9;
const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Outcome of one [`Registry::broadcast`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the frame was queued for.
    pub delivered: usize,
    /// Sessions whose queue refused the frame.
    pub failed: Vec<ClientId>,
}

/// Owns every live [`Session`].
///
/// ## Lifecycle
///
/// ```text
/// register() ──→ [Open] ──→ unregister() ──→ [Closing] (returned to caller)
///                                 │
///              teardown() ────────┘  (all sessions at once)
/// ```
pub struct Registry<C: Codec = JsonCodec> {
    /// Live sessions keyed by id.
    sessions: HashMap<ClientId, Session>,
    /// Ids in registration order, for roster snapshots.
    order: Vec<ClientId>,
    codec: C,
    events: broadcast::Sender<ServerEvent>,
}

impl Registry<JsonCodec> {
    /// Creates an empty registry speaking JSON.
    pub fn new() -> Self {
        Self::with_codec(JsonCodec)
    }
}

impl Default for Registry<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> Registry<C> {
    /// Creates an empty registry that encodes with `codec`.
    pub fn with_codec(codec: C) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            codec,
            events,
        }
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// A handle for publishing events from outside the lock (connection
    /// tasks report transport errors through it).
    pub fn event_sender(&self) -> broadcast::Sender<ServerEvent> {
        self.events.clone()
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// The codec used for outbound envelopes.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Registers a peer whose handshake has completed and returns its id.
    ///
    /// The id is fresh: it is checked against every live session before
    /// use. The session goes straight to `Open`.
    pub fn register(&mut self, secure: bool, outbox: Outbox) -> ClientId {
        let id = loop {
            let candidate = generate_client_id();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut session = Session::new(id.clone(), secure, outbox);
        // Connecting → Open is always valid for a fresh session.
        let _ = session.transition(SessionState::Open);

        self.order.push(id.clone());
        self.sessions.insert(id.clone(), session);

        tracing::info!(client_id = %id, secure, live = self.sessions.len(), "session registered");
        id
    }

    /// Removes a session and moves it to `Closing`.
    ///
    /// Returns `None` if the id is not registered: duplicate close signals
    /// are expected and harmless.
    pub fn unregister(&mut self, id: &ClientId) -> Option<Session> {
        let mut session = self.sessions.remove(id)?;
        self.order.retain(|other| other != id);
        if let Err(e) = session.transition(SessionState::Closing) {
            tracing::warn!(client_id = %id, error = %e, "unexpected state on unregister");
        }
        tracing::info!(client_id = %id, live = self.sessions.len(), "session unregistered");
        Some(session)
    }

    /// Encodes `envelope` once and queues it for every session except
    /// `exclude`.
    ///
    /// A session that cannot take the frame does not affect the others:
    /// it is listed in the report and an error event tagged with its id is
    /// published.
    ///
    /// # Errors
    /// Only if the envelope cannot be encoded.
    pub fn broadcast(
        &self,
        envelope: &Envelope,
        exclude: Option<&ClientId>,
    ) -> Result<BroadcastReport, SessionError> {
        let frame: Arc<str> = Arc::from(self.codec.encode(envelope)?);
        let mut report = BroadcastReport::default();

        for id in &self.order {
            if Some(id) == exclude {
                continue;
            }
            let Some(session) = self.sessions.get(id) else {
                continue;
            };
            match session.enqueue(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        client_id = %id,
                        kind = envelope.kind(),
                        error = %e,
                        "broadcast delivery failed"
                    );
                    self.emit(ServerEvent::Error(
                        ErrorEvent::new(ErrorKind::Connection, e.to_string())
                            .for_client(id.clone()),
                    ));
                    report.failed.push(id.clone());
                }
            }
        }

        tracing::debug!(
            kind = envelope.kind(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast"
        );
        Ok(report)
    }

    /// Queues `envelope` for a single session.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] for an unknown id, or whatever
    /// [`Session::enqueue`] reports.
    pub fn send_to(&self, id: &ClientId, envelope: &Envelope) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        let frame: Arc<str> = Arc::from(self.codec.encode(envelope)?);
        session.enqueue(frame)
    }

    /// The roster in registration order.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(Session::info)
            .collect()
    }

    /// Looks up a live session.
    pub fn get(&self, id: &ClientId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Releases every session, in registration order, each moved to
    /// `Closing`. Their outboxes drop, so writer tasks finish and close
    /// their transports.
    pub fn teardown(&mut self) -> Vec<Session> {
        let ids = std::mem::take(&mut self.order);
        let released: Vec<Session> = ids
            .iter()
            .filter_map(|id| self.sessions.remove(id))
            .map(|mut session| {
                let _ = session.transition(SessionState::Closing);
                session
            })
            .collect();
        tracing::info!(released = released.len(), "registry torn down");
        released
    }
}

/// `client-` followed by nine random base-36 characters.
fn generate_client_id() -> ClientId {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_LEN)
        .map(|_| char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]))
        .collect();
    ClientId::new(format!("{ID_PREFIX}{suffix}"))
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Naming: `test_{function}_{scenario}_{expected}`.

    use std::collections::HashSet;

    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::sync::mpsc;

    use super::*;

    type Inbox = mpsc::Receiver<Arc<str>>;

    fn outbox(capacity: usize) -> (Outbox, Inbox) {
        mpsc::channel(capacity)
    }

    fn join(reg: &mut Registry) -> (ClientId, Inbox) {
        let (tx, rx) = outbox(16);
        (reg.register(false, tx), rx)
    }

    fn drain(rx: &mut Inbox) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame.to_string());
        }
        frames
    }

    fn goodbye(id: &str) -> Envelope {
        Envelope::ClientDisconnected {
            client_id: ClientId::new(id),
        }
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[test]
    fn test_generate_client_id_shape() {
        let id = generate_client_id();
        let suffix = id.as_str().strip_prefix("client-").expect("prefix");
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|b| ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_register_returns_open_session_with_metadata() {
        let mut reg = Registry::new();
        let (tx, _rx) = outbox(4);
        let before = Utc::now();
        let id = reg.register(true, tx);

        let session = reg.get(&id).expect("registered");
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.is_secure());
        assert!(session.connected_at() >= before);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_many_ids_are_unique() {
        let mut reg = Registry::new();
        let mut inboxes = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let (id, rx) = join(&mut reg);
            inboxes.push(rx);
            assert!(seen.insert(id), "duplicate id handed out");
        }
        assert_eq!(reg.len(), 500);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_register_concurrent_callers_never_collide() {
        let reg = Arc::new(tokio::sync::Mutex::new(Registry::new()));
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let reg = Arc::clone(&reg);
            tasks.push(tokio::spawn(async move {
                let (tx, rx) = outbox(1);
                let id = reg.lock().await.register(false, tx);
                (id, rx)
            }));
        }
        let mut ids = HashSet::new();
        let mut inboxes = Vec::new();
        for task in tasks {
            let (id, rx) = task.await.unwrap();
            inboxes.push(rx);
            ids.insert(id);
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(reg.lock().await.len(), 64);
    }

    // =====================================================================
    // unregister()
    // =====================================================================

    #[test]
    fn test_unregister_returns_session_in_closing() {
        let mut reg = Registry::new();
        let (id, _rx) = join(&mut reg);

        let session = reg.unregister(&id).expect("was registered");
        assert_eq!(session.state(), SessionState::Closing);
        assert!(!reg.contains(&id));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_twice_is_noop() {
        let mut reg = Registry::new();
        let (a, _ra) = join(&mut reg);
        let (b, _rb) = join(&mut reg);

        assert!(reg.unregister(&a).is_some());
        let after_once = reg.snapshot();
        assert!(reg.unregister(&a).is_none());
        assert_eq!(reg.snapshot(), after_once);
        assert!(reg.contains(&b));
    }

    #[test]
    fn test_unregister_unknown_id_is_noop() {
        let mut reg = Registry::new();
        let (_a, _ra) = join(&mut reg);
        assert!(reg.unregister(&ClientId::new("client-nobody")).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unregister_drops_outbox() {
        let mut reg = Registry::new();
        let (id, mut rx) = join(&mut reg);
        let _session = reg.unregister(&id);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    // =====================================================================
    // snapshot()
    // =====================================================================

    #[test]
    fn test_snapshot_is_registration_order() {
        let mut reg = Registry::new();
        let (a, _ra) = join(&mut reg);
        let (b, _rb) = join(&mut reg);
        let (c, _rc) = join(&mut reg);
        reg.unregister(&b);
        let (d, _rd) = join(&mut reg);

        let ids: Vec<ClientId> = reg.snapshot().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, c, d]);
    }

    #[test]
    fn test_snapshot_size_matches_replayed_operations() {
        // Random register/unregister sequences, including unregisters of
        // ids that were never registered or are already gone.
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut reg = Registry::new();
            let mut live: Vec<(ClientId, Inbox)> = Vec::new();
            let mut registers = 0usize;
            let mut effective_unregisters = 0usize;

            for _ in 0..200 {
                match rng.random_range(0..3) {
                    0 => {
                        live.push(join(&mut reg));
                        registers += 1;
                    }
                    1 if !live.is_empty() => {
                        let idx = rng.random_range(0..live.len());
                        let (id, _rx) = live.swap_remove(idx);
                        if reg.unregister(&id).is_some() {
                            effective_unregisters += 1;
                        }
                        // Duplicate close signal.
                        assert!(reg.unregister(&id).is_none());
                    }
                    _ => {
                        assert!(reg.unregister(&ClientId::new("client-ghost")).is_none());
                    }
                }
                assert_eq!(reg.snapshot().len(), registers - effective_unregisters);
            }
        }
    }

    // =====================================================================
    // broadcast()
    // =====================================================================

    #[test]
    fn test_broadcast_reaches_everyone_once() {
        let mut reg = Registry::new();
        let (_a, mut ra) = join(&mut reg);
        let (_b, mut rb) = join(&mut reg);

        let report = reg.broadcast(&goodbye("x"), None).unwrap();
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());
        assert_eq!(drain(&mut ra).len(), 1);
        assert_eq!(drain(&mut rb).len(), 1);
    }

    #[test]
    fn test_broadcast_skips_excluded_session() {
        let mut reg = Registry::new();
        let (a, mut ra) = join(&mut reg);
        let (_b, mut rb) = join(&mut reg);

        let report = reg.broadcast(&goodbye("x"), Some(&a)).unwrap();
        assert_eq!(report.delivered, 1);
        assert!(drain(&mut ra).is_empty());
        assert_eq!(
            drain(&mut rb),
            vec![r#"{"type":"client_disconnected","clientId":"x"}"#.to_string()]
        );
    }

    #[test]
    fn test_broadcast_failure_is_isolated_and_reported() {
        let mut reg = Registry::new();
        let mut events = reg.subscribe();
        let (_a, mut ra) = join(&mut reg);
        let (b, rb) = join(&mut reg);
        let (_c, mut rc) = join(&mut reg);
        drop(rb); // b's writer is gone

        let report = reg.broadcast(&goodbye("x"), None).unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![b.clone()]);
        assert_eq!(drain(&mut ra).len(), 1);
        assert_eq!(drain(&mut rc).len(), 1);

        match events.try_recv().unwrap() {
            ServerEvent::Error(ev) => {
                assert_eq!(ev.kind, ErrorKind::Connection);
                assert_eq!(ev.client_id, Some(b));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_full_outbox_does_not_block_others() {
        let mut reg = Registry::new();
        let (slow_tx, _slow_rx) = outbox(1);
        let slow = reg.register(false, slow_tx);
        let (_fast, mut fast_rx) = join(&mut reg);

        reg.broadcast(&goodbye("1"), None).unwrap();
        let report = reg.broadcast(&goodbye("2"), None).unwrap();

        assert_eq!(report.failed, vec![slow]);
        assert_eq!(drain(&mut fast_rx).len(), 2);
    }

    #[test]
    fn test_broadcast_on_empty_registry() {
        let reg = Registry::new();
        let report = reg.broadcast(&goodbye("x"), None).unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    // =====================================================================
    // send_to() / teardown()
    // =====================================================================

    #[test]
    fn test_send_to_unknown_is_not_found() {
        let reg = Registry::new();
        let result = reg.send_to(&ClientId::new("client-x"), &goodbye("x"));
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[test]
    fn test_send_to_reaches_only_target() {
        let mut reg = Registry::new();
        let (a, mut ra) = join(&mut reg);
        let (_b, mut rb) = join(&mut reg);
        reg.send_to(&a, &Envelope::ClientsList { clients: vec![] })
            .unwrap();
        assert_eq!(drain(&mut ra).len(), 1);
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn test_teardown_releases_everything_in_order() {
        let mut reg = Registry::new();
        let (a, mut ra) = join(&mut reg);
        let (b, _rb) = join(&mut reg);

        let released = reg.teardown();
        let ids: Vec<&ClientId> = released.iter().map(Session::id).collect();
        assert_eq!(ids, vec![&a, &b]);
        assert!(released.iter().all(|s| s.state() == SessionState::Closing));
        assert!(reg.is_empty());
        assert!(reg.snapshot().is_empty());
        assert!(matches!(
            ra.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
