//! Error types and stable error codes.
//!
//! Nothing here escapes the engine as a panic: the connection driver turns
//! every variant into an observable `last_error` string, a notification, or a
//! logged-and-dropped frame.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The connection failed to open or closed abnormally.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote end rejected the credential. Never retried.
    #[error("authentication failed: {reason}")]
    AuthFailure { reason: String },

    /// The credential was already expired before a connection attempt.
    #[error("session expired")]
    SessionExpired,

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// A device command was reported as failed by the remote end.
    #[error("command {command} failed: {message}")]
    CommandFailure { command: String, message: String },

    /// An outbound command was issued while no connection is open.
    #[error("not connected")]
    NotConnected,

    /// The engine task has shut down and no longer accepts commands.
    #[error("sync engine stopped")]
    EngineStopped,
}

impl SyncError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::AuthFailure { .. } => "auth_failure",
            Self::SessionExpired => "session_expired",
            Self::Decode(_) => "decode_error",
            Self::CommandFailure { .. } => "command_failure",
            Self::NotConnected => "not_connected",
            Self::EngineStopped => "engine_stopped",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
