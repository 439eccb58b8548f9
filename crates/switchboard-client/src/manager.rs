//! The connection manager: operator commands in, console events out.
//!
//! ```text
//! connect(config) ──→ one worker task per enabled socket
//!                         │  dial → read frames → (drop) → backoff → dial …
//!                         ↓
//!                     Hub (roster, socket states, last error) ──→ ConsoleEvent stream
//!                         ↑
//! send_to(id, text) ──────┘  routed to the socket that announced `id`
//! disconnect() ──→ signal every worker, await them, back to Idle
//! ```
//!
//! Every piece of shared state lives in the [`Hub`] behind one
//! `tokio::sync::Mutex`. Workers hold the lock only to update state, never
//! across network I/O.

use std::collections::HashMap;
use std::sync::Arc;

use switchboard_protocol::{ClientId, ClientMessage, Codec, ErrorEvent, ErrorKind, JsonCodec};
use switchboard_transport::{Connection, Connector, WebSocketConnector};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::worker::SocketWorker;
use crate::{ClientError, ConnectConfig, ConsoleEvent, Mode, SocketState};

const EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Connect report
// ---------------------------------------------------------------------------

/// How one socket's first dial went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SocketOutcome {
    /// Not requested.
    #[default]
    Disabled,
    Open,
    /// The first dial failed. The socket keeps retrying per its
    /// [`ReconnectPolicy`](crate::ReconnectPolicy).
    Failed { reason: String },
}

/// Per-socket result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectReport {
    pub plain: SocketOutcome,
    pub secure: SocketOutcome,
}

impl ConnectReport {
    pub fn get(&self, mode: Mode) -> &SocketOutcome {
        match mode {
            Mode::Plain => &self.plain,
            Mode::Secure => &self.secure,
        }
    }

    fn set(&mut self, mode: Mode, outcome: SocketOutcome) {
        match mode {
            Mode::Plain => self.plain = outcome,
            Mode::Secure => self.secure = outcome,
        }
    }

    /// Returns `true` if at least one socket opened.
    pub fn any_open(&self) -> bool {
        self.plain == SocketOutcome::Open || self.secure == SocketOutcome::Open
    }
}

// ---------------------------------------------------------------------------
// Hub: shared state
// ---------------------------------------------------------------------------

pub(crate) struct SocketSlot<L> {
    state: SocketState,
    link: Option<Arc<L>>,
}

impl<L> Default for SocketSlot<L> {
    fn default() -> Self {
        Self {
            state: SocketState::Idle,
            link: None,
        }
    }
}

pub(crate) struct Shared<L> {
    plain: SocketSlot<L>,
    secure: SocketSlot<L>,
    /// Peer id → the socket whose presence stream announced it.
    roster: HashMap<ClientId, Mode>,
    last_error: Option<ErrorEvent>,
}

impl<L> Shared<L> {
    fn slot(&self, mode: Mode) -> &SocketSlot<L> {
        match mode {
            Mode::Plain => &self.plain,
            Mode::Secure => &self.secure,
        }
    }

    fn slot_mut(&mut self, mode: Mode) -> &mut SocketSlot<L> {
        match mode {
            Mode::Plain => &mut self.plain,
            Mode::Secure => &mut self.secure,
        }
    }
}

/// State shared between the manager and its workers.
pub(crate) struct Hub<L> {
    state: Mutex<Shared<L>>,
    events: broadcast::Sender<ConsoleEvent>,
}

impl<L> Hub<L> {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(Shared {
                plain: SocketSlot::default(),
                secure: SocketSlot::default(),
                roster: HashMap::new(),
                last_error: None,
            }),
            events,
        }
    }

    pub(crate) fn emit(&self, event: ConsoleEvent) {
        let _ = self.events.send(event);
    }

    /// Records `error` as the latest and publishes it.
    pub(crate) async fn report(&self, error: ErrorEvent) {
        self.state.lock().await.last_error = Some(error.clone());
        self.emit(ConsoleEvent::Error(error));
    }

    pub(crate) async fn set_state(&self, mode: Mode, state: SocketState) {
        self.state.lock().await.slot_mut(mode).state = state;
    }

    pub(crate) async fn opened(&self, mode: Mode, link: Arc<L>) {
        let mut shared = self.state.lock().await;
        let slot = shared.slot_mut(mode);
        slot.state = SocketState::Open;
        slot.link = Some(link);
    }

    /// Drops the socket's link and every peer it announced.
    pub(crate) async fn closed(&self, mode: Mode) {
        let mut shared = self.state.lock().await;
        shared.slot_mut(mode).link = None;
        shared.roster.retain(|_, learnt_on| *learnt_on != mode);
    }

    /// Remembers peers announced on `mode`. A peer already known keeps its
    /// first socket.
    pub(crate) async fn learn<'a>(&self, ids: impl IntoIterator<Item = &'a ClientId>, mode: Mode) {
        let mut shared = self.state.lock().await;
        for id in ids {
            shared.roster.entry(id.clone()).or_insert(mode);
        }
    }

    pub(crate) async fn forget(&self, id: &ClientId) {
        self.state.lock().await.roster.remove(id);
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

struct WorkerHandle {
    mode: Mode,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the operator's outbound sockets.
///
/// Construct one explicitly and keep it for as long as the console runs;
/// each `connect`/`disconnect` pair is one session with the server.
///
/// ## Sockets
///
/// There are at most two sockets, one per [`Mode`]. Each enabled socket is
/// driven by its own worker task with its own attempt counter:
///
/// ```text
/// Idle ──connect()──→ Connecting ──ok──→ Open
///                        ▲  │              │ dropped / error
///                        │  └─fail─┐       ▼
///                        └─sleep── Reconnecting{attempt}
///                                          │ attempt > max
///                                          ▼
///                                        Failed
/// ```
///
/// Every failure, including a failed dial, bumps the counter; a
/// successful open resets it. [`disconnect`](Self::disconnect) stops the
/// workers wherever they are (dialing, reading, or sleeping) and waits
/// for them, so no timer fires after it returns.
///
/// ## Routing
///
/// The manager learns which socket announced each peer (`clients_list`,
/// `client_connected`) and [`send_to`](Self::send_to) writes on that
/// socket. A peer nobody announced, or one whose socket is not open, is a
/// `Routing` error right away; nothing is queued for later.
///
/// # Example
///
/// ```rust,no_run
/// use switchboard_client::{ConnectConfig, ConnectionManager};
///
/// # async fn run() -> Result<(), switchboard_client::ClientError> {
/// let manager = ConnectionManager::new();
/// let mut events = manager.subscribe();
///
/// let report = manager.connect(ConnectConfig::plain("ws://localhost:8080")).await?;
/// println!("{report:?}");
///
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<C: Connector = WebSocketConnector> {
    connector: Arc<C>,
    codec: JsonCodec,
    hub: Arc<Hub<C::Connection>>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl ConnectionManager<WebSocketConnector> {
    /// A manager that dials real WebSocket endpoints.
    pub fn new() -> Self {
        Self::with_connector(WebSocketConnector)
    }
}

impl Default for ConnectionManager<WebSocketConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            codec: JsonCodec,
            hub: Arc::new(Hub::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Subscribes to socket, presence, message and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.hub.events.subscribe()
    }

    /// Opens every socket `config` enables and reports how each first dial
    /// went. Sockets that fail keep retrying in the background.
    ///
    /// # Errors
    /// - [`ClientError::Config`]: rejected before anything is dialed
    /// - [`ClientError::AlreadyConnected`]: call [`disconnect`](Self::disconnect) first
    pub async fn connect(&self, config: ConnectConfig) -> Result<ConnectReport, ClientError> {
        if let Err(e) = config.validate() {
            let err = ClientError::from(e);
            tracing::warn!(error = %err, "connect rejected");
            self.hub
                .report(ErrorEvent::new(err.kind(), err.to_string()))
                .await;
            return Err(err);
        }

        let mut pending = Vec::new();
        {
            let mut workers = self.workers.lock().await;
            if !workers.is_empty() {
                return Err(ClientError::AlreadyConnected);
            }

            for mode in Mode::ALL.into_iter().filter(|m| config.is_enabled(*m)) {
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let (first_tx, first_rx) = oneshot::channel();
                let worker = SocketWorker {
                    mode,
                    url: config.endpoint(mode).to_string(),
                    tls: if mode.is_secure() {
                        config.secure_credentials.clone()
                    } else {
                        None
                    },
                    policy: config.reconnect,
                    connector: Arc::clone(&self.connector),
                    hub: Arc::clone(&self.hub),
                    codec: self.codec,
                };
                tracing::info!(%mode, url = %worker.url, "connecting");
                let task = tokio::spawn(worker.run(shutdown_rx, first_tx));
                workers.push(WorkerHandle {
                    mode,
                    shutdown: shutdown_tx,
                    task,
                });
                pending.push((mode, first_rx));
            }
        }

        let mut report = ConnectReport::default();
        for (mode, first) in pending {
            let outcome = first.await.unwrap_or_else(|_| SocketOutcome::Failed {
                reason: "connect cancelled".to_string(),
            });
            report.set(mode, outcome);
        }
        Ok(report)
    }

    /// Closes both sockets, cancels pending retries and waits for the
    /// workers to finish. Nothing fires after this returns.
    pub async fn disconnect(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        if workers.is_empty() {
            return;
        }

        let mut tasks = Vec::with_capacity(workers.len());
        for WorkerHandle {
            mode,
            shutdown,
            task,
        } in workers
        {
            let _ = shutdown.send(());
            tasks.push((mode, task));
        }
        for (mode, task) in tasks {
            if let Err(e) = task.await {
                tracing::warn!(%mode, error = %e, "socket worker failed");
            }
        }

        {
            let mut shared = self.hub.state.lock().await;
            shared.plain = SocketSlot::default();
            shared.secure = SocketSlot::default();
            shared.roster.clear();
        }
        tracing::info!("disconnected");
        self.hub.emit(ConsoleEvent::Disconnected);
    }

    /// Sends chat content addressed to `client_id`, over the socket that
    /// announced that peer.
    ///
    /// # Errors
    /// - [`ClientError::UnknownClient`] / [`ClientError::SocketNotOpen`]:
    ///   routing failed; nothing was sent
    /// - [`ClientError::Transport`]: the socket rejected the frame
    pub async fn send_to(&self, client_id: &ClientId, content: &str) -> Result<(), ClientError> {
        let routed = {
            let shared = self.hub.state.lock().await;
            match shared.roster.get(client_id) {
                None => Err(ClientError::UnknownClient(client_id.clone())),
                Some(&mode) => {
                    let slot = shared.slot(mode);
                    match &slot.link {
                        Some(link) if slot.state.is_open() => Ok((mode, Arc::clone(link))),
                        _ => Err(ClientError::SocketNotOpen {
                            client_id: client_id.clone(),
                            mode,
                        }),
                    }
                }
            }
        };

        let (mode, link) = match routed {
            Ok(route) => route,
            Err(e) => {
                tracing::debug!(%client_id, error = %e, "send not routed");
                self.hub
                    .report(ErrorEvent::new(e.kind(), e.to_string()).for_client(client_id.clone()))
                    .await;
                return Err(e);
            }
        };

        let frame = self.codec.encode(&ClientMessage::Message {
            content: content.to_string(),
            client_id: Some(client_id.clone()),
        })?;
        if let Err(e) = link.send(&frame).await {
            tracing::warn!(%client_id, %mode, error = %e, "send failed");
            self.hub
                .report(
                    ErrorEvent::new(ErrorKind::Connection, e.to_string())
                        .for_client(client_id.clone()),
                )
                .await;
            return Err(e.into());
        }
        tracing::debug!(%client_id, %mode, "message sent");
        Ok(())
    }

    /// Current state of one socket.
    pub async fn state(&self, mode: Mode) -> SocketState {
        self.hub.state.lock().await.slot(mode).state
    }

    /// Known peers and the socket each was announced on, sorted by id.
    pub async fn roster(&self) -> Vec<(ClientId, Mode)> {
        let shared = self.hub.state.lock().await;
        let mut roster: Vec<(ClientId, Mode)> = shared
            .roster
            .iter()
            .map(|(id, mode)| (id.clone(), *mode))
            .collect();
        roster.sort();
        roster
    }

    /// The most recent error, if any.
    pub async fn last_error(&self) -> Option<ErrorEvent> {
        self.hub.state.lock().await.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    //! Manager tests run against a scripted connector; reconnection timing
    //! uses tokio's paused clock.

    use std::time::Duration;

    use serde_json::Value;
    use switchboard_transport::TlsCredentials;

    use super::*;
    use crate::ReconnectPolicy;
    use crate::testing::{Dial, MockConnector, MockLink};

    const PLAIN: &str = "ws://mock:8080";
    const SECURE: &str = "wss://mock:8443";

    fn manager() -> ConnectionManager<MockConnector> {
        ConnectionManager::with_connector(MockConnector::new())
    }

    fn both() -> ConnectConfig {
        ConnectConfig::plain(PLAIN).with_secure(SECURE, TlsCredentials::new("cert", "key"))
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<ConsoleEvent>,
        mut pred: impl FnMut(&ConsoleEvent) -> bool,
    ) -> ConsoleEvent {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let event = events.recv().await.expect("event stream");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn roster_frame(ids: &[&str]) -> Vec<u8> {
        let clients: Vec<Value> = ids
            .iter()
            .map(|id| serde_json::json!({ "id": id, "connectedAt": "2024-01-01T00:00:00Z" }))
            .collect();
        serde_json::json!({ "type": "clients_list", "clients": clients })
            .to_string()
            .into_bytes()
    }

    // =====================================================================
    // connect()
    // =====================================================================

    #[tokio::test]
    async fn test_connect_secure_without_credentials_dials_nothing() {
        let manager = manager();
        let mut events = manager.subscribe();
        let config = ConnectConfig {
            secure_enabled: true,
            ..ConnectConfig::plain(PLAIN)
        };

        let result = manager.connect(config).await;

        assert!(matches!(
            result,
            Err(ClientError::Config(crate::ConfigError::MissingCredentials))
        ));
        assert_eq!(manager.connector().total_dials(), 0);
        assert_eq!(manager.last_error().await.unwrap().kind, ErrorKind::Config);
        assert!(matches!(
            events.try_recv().unwrap(),
            ConsoleEvent::Error(ErrorEvent {
                kind: ErrorKind::Config,
                ..
            })
        ));
        assert_eq!(manager.state(Mode::Plain).await, SocketState::Idle);
    }

    #[tokio::test]
    async fn test_connect_nothing_enabled_is_config_error() {
        let manager = manager();
        let config = ConnectConfig {
            plain_enabled: false,
            ..ConnectConfig::default()
        };
        assert!(matches!(
            manager.connect(config).await,
            Err(ClientError::Config(crate::ConfigError::NoModeEnabled))
        ));
        assert_eq!(manager.connector().total_dials(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reports_each_socket() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (link, _remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(link));
        manager.connector().script(SECURE, Dial::Refuse);

        let report = manager.connect(both()).await.unwrap();

        assert_eq!(report.plain, SocketOutcome::Open);
        assert!(matches!(report.secure, SocketOutcome::Failed { .. }));
        assert!(report.any_open());
        assert_eq!(manager.state(Mode::Plain).await, SocketState::Open);
        wait_for(&mut events, |e| {
            matches!(e, ConsoleEvent::Reconnecting { mode: Mode::Secure, .. })
        })
        .await;
        assert_eq!(
            manager.state(Mode::Secure).await,
            SocketState::Reconnecting { attempt: 1 }
        );
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_is_already_connected() {
        let manager = manager();
        let (first, _r1) = MockLink::pair();
        let (second, _r2) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(first));
        manager.connector().script(PLAIN, Dial::Accept(second));

        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();
        assert!(matches!(
            manager.connect(ConnectConfig::plain(PLAIN)).await,
            Err(ClientError::AlreadyConnected)
        ));

        manager.disconnect().await;
        let report = manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();
        assert_eq!(report.plain, SocketOutcome::Open);
        manager.disconnect().await;
    }

    // =====================================================================
    // Reconnection
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_three_retries() {
        let manager = manager();
        let mut events = manager.subscribe();

        let report = manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();
        assert!(matches!(report.plain, SocketOutcome::Failed { .. }));

        let mut delays = Vec::new();
        loop {
            match wait_for(&mut events, |_| true).await {
                ConsoleEvent::Reconnecting { attempt, delay, .. } => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay);
                }
                ConsoleEvent::SocketFailed { mode } => {
                    assert_eq!(mode, Mode::Plain);
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6)
            ]
        );
        let times = manager.connector().dial_times(PLAIN);
        assert_eq!(times.len(), 4, "one dial plus three retries");
        for (gap, expected) in times.windows(2).zip(&delays) {
            assert!(gap[1] - gap[0] >= *expected);
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.connector().dial_times(PLAIN).len(), 4);
        assert_eq!(manager.state(Mode::Plain).await, SocketState::Failed);
        assert_eq!(
            manager.last_error().await.unwrap().kind,
            ErrorKind::Connection
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_policy_is_configurable() {
        let manager = manager();
        let mut events = manager.subscribe();
        let config = ConnectConfig::plain(PLAIN).with_reconnect(ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 1,
        });

        manager.connect(config).await.unwrap();
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::SocketFailed { .. })).await;

        assert_eq!(manager.connector().dial_times(PLAIN).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let manager = manager();
        let mut events = manager.subscribe();

        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::Reconnecting { .. })).await;

        manager.disconnect().await;
        wait_for(&mut events, |e| *e == ConsoleEvent::Disconnected).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.connector().dial_times(PLAIN).len(), 1);
        assert_eq!(manager.state(Mode::Plain).await, SocketState::Idle);
        assert!(events.try_recv().is_err(), "nothing fires after disconnect");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (first, remote1) = MockLink::pair();
        let (second, remote2) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(first));
        manager.connector().script(PLAIN, Dial::Accept(second));

        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();
        drop(remote1);
        let retry = wait_for(&mut events, |e| matches!(e, ConsoleEvent::Reconnecting { .. })).await;
        assert!(matches!(retry, ConsoleEvent::Reconnecting { attempt: 1, .. }));

        wait_for(&mut events, |e| matches!(e, ConsoleEvent::SocketOpened { .. })).await;
        drop(remote2);
        let retry = wait_for(&mut events, |e| matches!(e, ConsoleEvent::Reconnecting { .. })).await;
        assert_eq!(
            retry,
            ConsoleEvent::Reconnecting {
                mode: Mode::Plain,
                attempt: 1,
                delay: Duration::from_secs(2),
            }
        );
        manager.disconnect().await;
    }

    // =====================================================================
    // Inbound frames
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_presence_frames_become_events_and_roster() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (link, remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(link));
        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();

        remote.push(roster_frame(&["client-a"]));
        remote.push_str(
            r#"{"type":"client_connected","client":{"id":"client-b","connectedAt":"2024-01-01T00:00:01Z"}}"#,
        );
        remote.push_str(r#"{"type":"client_disconnected","clientId":"client-a"}"#);
        remote.push_str(
            r#"{"type":"message","clientId":"client-b","content":"yo","timestamp":"2024-01-01T00:00:02Z"}"#,
        );

        match wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { .. })).await {
            ConsoleEvent::ClientsList { clients, secure } => {
                assert_eq!(clients.len(), 1);
                assert!(!secure);
            }
            _ => unreachable!(),
        }
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientConnected { .. })).await;
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientDisconnected { .. })).await;
        match wait_for(&mut events, |e| matches!(e, ConsoleEvent::Message { .. })).await {
            ConsoleEvent::Message {
                client_id, content, ..
            } => {
                assert_eq!(client_id.as_str(), "client-b");
                assert_eq!(content, "yo");
            }
            _ => unreachable!(),
        }

        assert_eq!(
            manager.roster().await,
            vec![(ClientId::new("client-b"), Mode::Plain)]
        );
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_reports_decode_and_keeps_socket() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (link, remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(link));
        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();

        remote.push_str("nope");
        let error = wait_for(&mut events, |e| matches!(e, ConsoleEvent::Error(_))).await;
        assert!(matches!(
            error,
            ConsoleEvent::Error(ErrorEvent {
                kind: ErrorKind::Decode,
                ..
            })
        ));
        assert_eq!(manager.state(Mode::Plain).await, SocketState::Open);

        remote.push(roster_frame(&[]));
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { .. })).await;
        manager.disconnect().await;
    }

    // =====================================================================
    // send_to()
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_send_to_routes_by_announcing_socket() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (plain, plain_remote) = MockLink::pair();
        let (secure, secure_remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(plain));
        manager.connector().script(SECURE, Dial::Accept(secure));
        manager.connect(both()).await.unwrap();

        plain_remote.push(roster_frame(&["client-p"]));
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { secure: false, .. })).await;
        secure_remote.push(roster_frame(&["client-s"]));
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { secure: true, .. })).await;

        manager.send_to(&ClientId::new("client-p"), "to plain").await.unwrap();
        manager.send_to(&ClientId::new("client-s"), "to secure").await.unwrap();

        let sent_plain = plain_remote.sent();
        assert_eq!(sent_plain.len(), 1);
        let frame: Value = serde_json::from_str(&sent_plain[0]).unwrap();
        assert_eq!(
            frame,
            serde_json::json!({"type": "message", "content": "to plain", "clientId": "client-p"})
        );
        let sent_secure = secure_remote.sent();
        assert_eq!(sent_secure.len(), 1);
        assert!(sent_secure[0].contains("to secure"));
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_unknown_is_routing_error() {
        let manager = manager();
        let (link, remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(link));
        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();

        let ghost = ClientId::new("client-ghost");
        let err = manager.send_to(&ghost, "hello?").await.unwrap_err();

        assert!(matches!(err, ClientError::UnknownClient(_)));
        let last = manager.last_error().await.unwrap();
        assert_eq!(last.kind, ErrorKind::Routing);
        assert_eq!(last.client_id, Some(ghost));
        assert!(remote.sent().is_empty());
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_close_forgets_its_peers() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (plain, plain_remote) = MockLink::pair();
        let (secure, secure_remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(plain));
        manager.connector().script(SECURE, Dial::Accept(secure));
        manager.connect(both()).await.unwrap();

        plain_remote.push(roster_frame(&["client-p"]));
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { secure: false, .. })).await;
        secure_remote.push(roster_frame(&["client-s"]));
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { secure: true, .. })).await;

        drop(secure_remote);
        wait_for(&mut events, |e| {
            *e == ConsoleEvent::SocketClosed { mode: Mode::Secure }
        })
        .await;

        assert_eq!(
            manager.roster().await,
            vec![(ClientId::new("client-p"), Mode::Plain)]
        );
        assert!(matches!(
            manager.send_to(&ClientId::new("client-s"), "x").await,
            Err(ClientError::UnknownClient(_))
        ));
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_links_and_clears_roster() {
        let manager = manager();
        let mut events = manager.subscribe();
        let (link, remote) = MockLink::pair();
        manager.connector().script(PLAIN, Dial::Accept(link));
        manager.connect(ConnectConfig::plain(PLAIN)).await.unwrap();
        remote.push(roster_frame(&["client-a"]));
        wait_for(&mut events, |e| matches!(e, ConsoleEvent::ClientsList { .. })).await;

        manager.disconnect().await;

        assert!(remote.is_closed());
        assert!(manager.roster().await.is_empty());
        assert_eq!(manager.state(Mode::Plain).await, SocketState::Idle);
        // A second disconnect is a no-op.
        manager.disconnect().await;
    }
}
