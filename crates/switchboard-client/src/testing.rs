//! Scripted connector for manager tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use switchboard_transport::{Connection, ConnectionId, Connector, TlsCredentials, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

/// What the next dial to a URL does.
pub(crate) enum Dial {
    Refuse,
    Accept(MockLink),
}

/// Hands out scripted dial results per URL and records every dial.
/// Unscripted dials are refused.
#[derive(Default)]
pub(crate) struct MockConnector {
    scripts: Mutex<HashMap<String, VecDeque<Dial>>>,
    dials: Mutex<Vec<(String, Instant)>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, url: &str, dial: Dial) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(dial);
    }

    pub(crate) fn total_dials(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    pub(crate) fn dial_times(&self, url: &str) -> Vec<Instant> {
        self.dials
            .lock()
            .unwrap()
            .iter()
            .filter(|(dialed, _)| dialed == url)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl Connector for MockConnector {
    type Connection = MockLink;

    fn connect(
        &self,
        url: &str,
        _tls: Option<&TlsCredentials>,
    ) -> impl Future<Output = Result<MockLink, TransportError>> + Send {
        self.dials
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        let url = url.to_string();
        async move {
            match next {
                Some(Dial::Accept(link)) => Ok(link),
                Some(Dial::Refuse) | None => Err(TransportError::ConnectFailed {
                    url,
                    reason: "connection refused".into(),
                }),
            }
        }
    }
}

/// The manager's end of a scripted socket.
pub(crate) struct MockLink {
    id: ConnectionId,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// The server's end: push frames, inspect what was sent. Dropping it
/// closes the socket from the server side.
pub(crate) struct Remote {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    pub(crate) fn pair() -> (MockLink, Remote) {
        let (frames, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let link = MockLink {
            id: ConnectionId::new(NEXT_LINK.fetch_add(1, Ordering::Relaxed)),
            incoming: tokio::sync::Mutex::new(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (link, Remote { frames, sent, closed })
    }
}

impl Remote {
    pub(crate) fn push(&self, frame: Vec<u8>) {
        let _ = self.frames.send(frame);
    }

    pub(crate) fn push_str(&self, frame: &str) {
        self.push(frame.as_bytes().to_vec());
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for MockLink {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("link closed".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_secure(&self) -> bool {
        false
    }
}
