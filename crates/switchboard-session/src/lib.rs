//! Peer session management for Switchboard.
//!
//! This crate handles the lifecycle of peer connections on the server:
//!
//! 1. **Session tracking**: one [`Session`] per connected peer, with an
//!    explicit [`SessionState`] machine
//! 2. **Registry**: the live roster ([`Registry`]): id assignment,
//!    removal, snapshots, and broadcast fan-out
//! 3. **Events**: [`ServerEvent`]s for whoever renders the roster
//!
//! # How it fits in the stack
//!
//! ```text
//! Relay policy (above)  ← decides who gets which envelope
//!     ↕
//! Session layer (this crate)  ← owns sessions and their outboxes
//!     ↕
//! Protocol layer (below)  ← Envelope, ClientId, Codec
//! ```

mod error;
mod event;
mod registry;
mod session;

pub use error::SessionError;
pub use event::ServerEvent;
pub use registry::{BroadcastReport, Registry};
pub use session::{Outbox, Session, SessionState};
