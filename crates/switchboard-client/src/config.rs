//! What the operator asks the manager to connect to.

use std::fmt;
use std::time::Duration;

use switchboard_transport::TlsCredentials;

pub const DEFAULT_PLAIN_ENDPOINT: &str = "ws://localhost:8080";
pub const DEFAULT_SECURE_ENDPOINT: &str = "wss://localhost:8443";

/// Which of the two sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    /// `ws://`
    Plain,
    /// `wss://`
    Secure,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Plain, Mode::Secure];

    pub fn is_secure(self) -> bool {
        self == Mode::Secure
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Secure => f.write_str("secure"),
        }
    }
}

/// Backoff schedule for a socket that dropped or could not be dialed.
///
/// The n-th consecutive failure waits `base_delay * n`; failure number
/// `max_attempts + 1` gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// limit is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

/// Rejected connect request. Nothing is dialed when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one of plain or secure must be enabled")]
    NoModeEnabled,

    #[error("secure mode needs a certificate and private key")]
    MissingCredentials,
}

/// Parameters of one [`connect`](crate::ConnectionManager::connect) call.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub plain_enabled: bool,
    pub secure_enabled: bool,
    pub plain_endpoint: String,
    pub secure_endpoint: String,
    pub secure_credentials: Option<TlsCredentials>,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            plain_enabled: true,
            secure_enabled: false,
            plain_endpoint: DEFAULT_PLAIN_ENDPOINT.to_string(),
            secure_endpoint: DEFAULT_SECURE_ENDPOINT.to_string(),
            secure_credentials: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConnectConfig {
    /// Plain socket only, at `endpoint`.
    pub fn plain(endpoint: impl Into<String>) -> Self {
        Self {
            plain_endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Adds the secure socket at `endpoint`, trusting `credentials`.
    pub fn with_secure(mut self, endpoint: impl Into<String>, credentials: TlsCredentials) -> Self {
        self.secure_enabled = true;
        self.secure_endpoint = endpoint.into();
        self.secure_credentials = Some(credentials);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn is_enabled(&self, mode: Mode) -> bool {
        match mode {
            Mode::Plain => self.plain_enabled,
            Mode::Secure => self.secure_enabled,
        }
    }

    pub fn endpoint(&self, mode: Mode) -> &str {
        match mode {
            Mode::Plain => &self.plain_endpoint,
            Mode::Secure => &self.secure_endpoint,
        }
    }

    /// Checks the request before anything is dialed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.plain_enabled && !self.secure_enabled {
            return Err(ConfigError::NoModeEnabled);
        }
        if self.secure_enabled && self.secure_credentials.is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }
}
