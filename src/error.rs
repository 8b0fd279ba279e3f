use crate::model::SessionStatus;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failure classes surfaced by the session core.
///
/// Agent-runtime failures are deliberately absent: they are absorbed into
/// an `error` response payload and persisted on the session rather than
/// propagated (see `SessionCoordinator`).
#[derive(Debug, Error)]
pub enum SessionError {
    /// No live record exists for the (user, session) pair.
    #[error("session {user_id}:{session_id} not found")]
    NotFound { user_id: String, session_id: String },

    /// The user has no live sessions at all.
    #[error("user {0} not found")]
    UserNotFound(String),

    /// The requested operation is not legal in the session's current status.
    #[error("cannot {event} while session status is {status}")]
    InvalidTransition {
        event: &'static str,
        status: SessionStatus,
    },

    /// A resume decision failed validation before reaching the runtime.
    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    /// The backing store is unreachable or misbehaving.
    #[error("session store unavailable: {0}")]
    Store(String),

    /// The long-term memory collaborator failed.
    #[error("memory service failure: {0}")]
    Memory(String),

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn not_found(user_id: &str, session_id: &str) -> Self {
        Self::NotFound {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
        }
    }
}

#[cfg(feature = "redis")]
pub(crate) fn redis_error(err: redis::RedisError) -> SessionError {
    SessionError::Store(err.to_string())
}
