//! Error types for the protocol layer.
//!
//! Each crate in Skirmish defines its own error enum. A `ProtocolError`
//! always means the problem is in (de)serialization or in the shape of an
//! identifier, never in combat rules or session routing.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, a missing `type` tag on a command,
    /// or an unknown command kind.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A controller string was not `gm` or `player:<id>`.
    #[error("invalid controller {0:?}: expected \"gm\" or \"player:<id>\"")]
    InvalidController(String),

    /// The message passed deserialization but breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
