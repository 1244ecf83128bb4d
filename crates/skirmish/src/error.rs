//! Unified error type for Skirmish.

use serde::{Deserialize, Serialize};
use skirmish_combat::CombatError;
use skirmish_protocol::ProtocolError;
use skirmish_session::SessionError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SkirmishError {
    /// Encode/decode failure or a malformed id.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Unknown, closed, or terminated session, or a rejected command.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A combat rule was broken outside any session.
    #[error(transparent)]
    Combat(#[from] CombatError),
}

impl SkirmishError {
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) => 400,
            Self::Session(err) => err.code(),
            Self::Combat(err) => err.code(),
        }
    }

    pub fn kind(&self) -> String {
        match self {
            Self::Protocol(_) => "malformed".to_string(),
            Self::Session(err) => err.kind(),
            Self::Combat(err) => err.kind().to_string(),
        }
    }
}

/// Wire form of an error, returned only to the caller that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReceipt {
    pub code: u16,
    pub kind: String,
    pub message: String,
}

impl From<&SkirmishError> for ErrorReceipt {
    fn from(err: &SkirmishError) -> Self {
        Self {
            code: err.code(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use skirmish_combat::Missing;
    use skirmish_protocol::{EntityId, SessionId};

    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Protocol(_)));
        assert_eq!(skirmish_err.code(), 400);
        assert_eq!(skirmish_err.kind(), "malformed");
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(SessionId(4));
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Session(_)));
        assert_eq!(skirmish_err.code(), 404);
    }

    #[test]
    fn test_from_combat_error() {
        let err = CombatError::NotFound(Missing::Entity(EntityId::from("orc")));
        let skirmish_err: SkirmishError = err.into();
        assert!(matches!(skirmish_err, SkirmishError::Combat(_)));
    }

    #[test]
    fn test_error_receipt_carries_code_kind_message() {
        let err = SkirmishError::from(SessionError::from(CombatError::AlreadyResolved(
            "contest C-1".into(),
        )));
        let receipt = ErrorReceipt::from(&err);
        assert_eq!(receipt.code, 409);
        assert_eq!(receipt.kind, "already_resolved");
        assert_eq!(receipt.message, "contest C-1 is already resolved");
    }
}
