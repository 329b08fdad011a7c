use speech_session_types::{ActivityError, AudioError};

/// Errors surfaced by sessions and task handles.
///
/// Precondition failures (`InvalidState`, `NotConnected`, `AlreadyConnected`,
/// `DuplicateId`) are reported before any background work starts. Failures
/// of in-flight work arrive through the returned handle, usually paired with
/// a `Canceled` event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Operation '{operation}' is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Intent id '{0}' is already bound")]
    DuplicateId(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Session faulted: {0}")]
    Faulted(String),
    #[error("Operation canceled")]
    Canceled,
    #[error("Invalid activity: {0}")]
    InvalidActivity(String),
    #[error("Audio input error: {0}")]
    Audio(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        Self::InvalidState {
            operation,
            state: format!("{:?}", state),
        }
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::Audio(err.to_string())
    }
}

impl From<crate::config::ConfigError> for SessionError {
    fn from(err: crate::config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

impl From<ActivityError> for SessionError {
    fn from(err: ActivityError) -> Self {
        SessionError::InvalidActivity(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}
