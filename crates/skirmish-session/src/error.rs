//! Error types for the session layer.

use skirmish_combat::CombatError;
use skirmish_protocol::SessionId;

/// Errors a caller can get back from a session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// No session with this id exists.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session's command channel is closed.
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),

    /// The session hit an internal fault and no longer accepts commands.
    #[error("session {session_id} terminated: {reason}")]
    Terminated {
        session_id: SessionId,
        reason: String,
    },

    /// The combat rules rejected the command.
    #[error(transparent)]
    Rejected(#[from] CombatError),
}

impl SessionError {
    /// HTTP-style status code for the wire.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unavailable(_) => 503,
            Self::Terminated { .. } => 500,
            Self::Rejected(err) => err.code(),
        }
    }

    /// Short machine-readable label.
    pub fn kind(&self) -> String {
        match self {
            Self::NotFound(_) => "session_not_found".to_string(),
            Self::Unavailable(_) => "unavailable".to_string(),
            Self::Terminated { .. } => "terminated".to_string(),
            Self::Rejected(err) => err.kind().to_string(),
        }
    }
}
