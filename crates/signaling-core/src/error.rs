//! Error types for the signaling orchestration layer

use thiserror::Error;

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Errors that can occur while orchestrating a signaling session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SignalingError {
    /// Operation is not valid in the current running/disposed state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Required input is missing or malformed
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The signaling transport failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// An operation did not complete in time
    #[error("Operation timed out after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },
}

impl SignalingError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed
    ///
    /// Transport failures and timeouts are transient. State and argument
    /// errors will fail the same way on every attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::OperationTimeout { .. }
        )
    }

    /// Short category label used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "state",
            Self::InvalidArgument { .. } => "argument",
            Self::Transport { .. } => "transport",
            Self::OperationTimeout { .. } => "timeout",
        }
    }
}
