//! Codec trait and implementations.
//!
//! The engine never writes bytes itself. Whatever carries commands to a
//! session (a WebSocket, a message bus, a test harness) picks a [`Codec`]
//! and the facade crate uses it to decode commands and encode receipts.
//!
//! [`JsonCodec`] is the default: human-readable and easy to inspect from a
//! browser client. A binary codec can be added later behind its own
//! feature without touching any other layer.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes Rust values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because a codec is shared by every session task
/// for the lifetime of the engine.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented
    /// in this format.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// Behind the `json` feature (enabled by default).
///
/// ```rust
/// use skirmish_protocol::{Codec, Controller, JsonCodec, PlayerId};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&Controller::Player(PlayerId(7))).unwrap();
/// assert_eq!(bytes, br#""player:7""#);
///
/// let back: Controller = codec.decode(&bytes).unwrap();
/// assert_eq!(back, Controller::Player(PlayerId(7)));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
