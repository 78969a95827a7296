//! Error types for the sync engine.

use tallysync_protocol::RecordId;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur in the engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Timeout enforced by the transport.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Malformed data. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The targeted record does not exist.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The operation was abandoned before it could finish.
    #[error("operation cancelled")]
    Cancelled,

    /// The owning session has been torn down.
    #[error("sync session shut down")]
    ShutDown,

    /// Payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broad family an error belongs to, used for user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network, server or timeout failures. Retried by the scheduler.
    Transport,
    /// A recorded disagreement that needs a resolution policy.
    Conflict,
    /// Detected divergence between cache and server.
    Consistency,
    /// Malformed data.
    Validation,
    /// Cancellation or teardown.
    Lifecycle,
}

impl ErrorCategory {
    /// Returns a short recovery hint for this category.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "Check your connection and retry the sync.",
            ErrorCategory::Conflict => "Review and resolve the conflicting changes.",
            ErrorCategory::Consistency => "Run a consistency check and repair the issues found.",
            ErrorCategory::Validation => "Correct the highlighted data and try again.",
            ErrorCategory::Lifecycle => "Restart synchronization.",
        }
    }
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns the error family.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Transport { .. }
            | SyncError::ServerError(_)
            | SyncError::Timeout
            | SyncError::NotConnected => ErrorCategory::Transport,
            SyncError::Validation(_) | SyncError::Serialization(_) => ErrorCategory::Validation,
            SyncError::RecordNotFound(_) => ErrorCategory::Consistency,
            SyncError::Cancelled | SyncError::ShutDown => ErrorCategory::Lifecycle,
        }
    }
}
