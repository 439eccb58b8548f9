//! Wire protocol for Switchboard.
//!
//! This crate defines what peers and the server say to each other:
//!
//! - **Types** ([`Envelope`], [`ClientMessage`], [`ClientInfo`],
//!   [`ClientId`]): the frames that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames are converted
//!   to and from text, with validation at the boundary.
//! - **Errors** ([`ProtocolError`], [`ErrorEvent`]): what can go wrong
//!   while decoding, and the structured events both sides report.
//!
//! ```text
//! Transport (text frames) → Protocol (Envelope / ClientMessage) → Registry
//! ```

mod codec;
mod error;
mod event;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use event::{ErrorEvent, ErrorKind};
pub use types::{ClientId, ClientInfo, ClientMessage, Envelope, Timestamp, Validate};
