//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding frames.
///
/// Every variant maps to a `DecodeError` event when it happens to an
/// inbound frame: the frame is dropped and the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, an unknown `type`, a
    /// missing required field, or a field of the wrong type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed but breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
