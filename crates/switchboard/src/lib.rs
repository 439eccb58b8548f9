//! # Switchboard
//!
//! WebSocket presence relay.
//!
//! Peers connect over plain (`ws://`) or TLS (`wss://`) WebSocket. Each one
//! gets an opaque id and the current roster, everyone else hears that it
//! arrived, chat it sends is relayed to the rest of the roster, and its
//! departure is announced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchboard::prelude::*;
//!
//! # async fn start() -> Result<(), SwitchboardError> {
//! let config = ServerConfig::from_env()?;
//! let server = SwitchboardServerBuilder::from_config(&config)?.build().await?;
//!
//! let mut events = server.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//!
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod relay;
mod server;

pub use config::{
    ConfigError, DEFAULT_HOST, DEFAULT_OUTBOX_CAPACITY, DEFAULT_PORT, DEFAULT_SECURE_PORT,
    ServerConfig, TlsPaths,
};
pub use error::SwitchboardError;
pub use relay::{Relay, RelayPolicy};
pub use server::{SwitchboardServer, SwitchboardServerBuilder};

/// Everything needed to run a server and consume its events.
pub mod prelude {
    pub use crate::{
        ConfigError, Relay, RelayPolicy, ServerConfig, SwitchboardError, SwitchboardServer,
        SwitchboardServerBuilder,
    };
    pub use switchboard_protocol::{
        ClientId, ClientInfo, ClientMessage, Codec, Envelope, ErrorEvent, ErrorKind, JsonCodec,
    };
    pub use switchboard_session::{ServerEvent, SessionState};
    pub use switchboard_transport::TlsCredentials;
}
