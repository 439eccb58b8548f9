//! Codec trait and implementations for serializing/deserializing frames.
//!
//! Frames are text, so a codec turns values into `String`s and parses
//! byte slices (whatever the transport delivered) back into values. The
//! registry and the connection manager only see the [`Codec`] trait.

use serde::{Serialize, de::DeserializeOwned};

use crate::{ProtocolError, Validate};

/// A codec that can encode Rust types to text frames and decode them back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → one codec is shared by every connection task, and
///   Tokio may poll those tasks on any worker thread.
/// - `'static` → the codec owns everything it needs, so it can live inside
///   the registry and the connection manager for the life of the process.
///
/// ## Generic methods
///
/// `encode` and `decode` work with any `T` that has the matching serde
/// trait:
/// - `encode<T: Serialize>` → `T` becomes one text frame
/// - `decode<T: DeserializeOwned>` → `T` is rebuilt from the bytes the
///   transport delivered (text and binary frames alike)
///
/// `DeserializeOwned` means the decoded value owns its data, so the frame
/// buffer can be dropped as soon as decoding returns.
///
/// ## Encode once, send many
///
/// The session registry's `broadcast` encodes an envelope a single time
/// and shares the frame with every recipient's outbox, so a broadcast
/// costs one `encode` no matter how many peers are connected.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into one text frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a frame back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed, not
    /// UTF-8, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes a frame and runs its protocol-level [`Validate`] checks.
    ///
    /// This is the boundary check for everything arriving off the wire.
    fn decode_valid<T: DeserializeOwned + Validate>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        let value: T = self.decode(data)?;
        value.validate()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use switchboard_protocol::{ClientId, Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::ClientDisconnected { client_id: ClientId::new("client-1") };
///
/// let text = codec.encode(&envelope).unwrap();
/// assert_eq!(text, r#"{"type":"client_disconnected","clientId":"client-1"}"#);
///
/// let decoded: Envelope = codec.decode_valid(text.as_bytes()).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
