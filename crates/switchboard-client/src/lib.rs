//! Operator-side connection management for Switchboard.
//!
//! A [`ConnectionManager`] owns up to two outbound sockets to a Switchboard
//! server, one plain (`ws://`) and one TLS (`wss://`). It:
//!
//! - validates the request before dialing ([`ConnectConfig`])
//! - reconnects each socket on its own with linear backoff, giving up
//!   after [`ReconnectPolicy::max_attempts`] retries
//! - keeps a roster of peers, remembering which socket announced each one,
//!   and routes [`send_to`](ConnectionManager::send_to) accordingly
//! - publishes everything that happens as [`ConsoleEvent`]s
//!
//! ```text
//! Presentation layer  ← ConsoleEvent stream / connect, disconnect, send_to
//!     ↕
//! Connection manager (this crate)
//!     ↕
//! Transport (Connector) + Protocol (Envelope, ClientMessage)
//! ```

mod config;
mod error;
mod event;
mod manager;
#[cfg(test)]
mod testing;
mod worker;

pub use config::{
    ConfigError, ConnectConfig, DEFAULT_PLAIN_ENDPOINT, DEFAULT_SECURE_ENDPOINT, Mode,
    ReconnectPolicy,
};
pub use error::ClientError;
pub use event::{ConsoleEvent, SocketState};
pub use manager::{ConnectReport, ConnectionManager, SocketOutcome};
