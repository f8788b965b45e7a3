//! Error types for the sync engine.

use omci_core::DatabaseError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing a device.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No response arrived in time.
    #[error("operation timed out")]
    Timeout,

    /// The OMCI channel failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The device answered with something the engine did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Entity database error.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The task or synchronizer was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The agent does not manage this device.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The request is not valid in the current state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidState {
        /// Current state.
        from: String,
        /// Requested target.
        to: String,
    },

    /// The device rejected a command.
    #[error("command failed: {reason}")]
    CommandFailed {
        /// Result reported by the device.
        reason: String,
    },
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

    /// Creates an invalid state error.
    pub fn invalid_state(from: impl ToString, to: impl Into<String>) -> Self {
        Self::InvalidState {
            from: from.to_string(),
            to: to.into(),
        }
    }

    /// Creates a command failure.
    pub fn command_failed(reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Protocol(_) => true,
            _ => false,
        }
    }
}
