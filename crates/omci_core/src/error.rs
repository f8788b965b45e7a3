//! Error types for the entity database.

use thiserror::Error;

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors that can occur in entity database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Argument out of range or of the wrong type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The database has not been started.
    #[error("database is not active")]
    NotActive,

    /// Unknown device.
    #[error("device not found: {0}")]
    NotFound(String),

    /// Device already present and overwrite was not requested.
    #[error("device already exists: {0}")]
    AlreadyExists(String),

    /// Key-value store error.
    #[error("storage error: {0}")]
    Storage(#[from] omci_storage::StorageError),

    /// Attribute or record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] omci_codec::CodecError),

    /// A stored record could not be interpreted.
    #[error("corrupted record at {key}: {message}")]
    Corrupted {
        /// Store key of the record.
        key: String,
        /// Description of the problem.
        message: String,
    },
}

impl DatabaseError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a not found error.
    pub fn not_found(device_id: impl Into<String>) -> Self {
        Self::NotFound(device_id.into())
    }

    /// Create a corrupted record error.
    pub fn corrupted(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true for caller errors that must not be retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::InvalidArgument(_)
                | DatabaseError::NotActive
                | DatabaseError::AlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations() {
        assert!(DatabaseError::NotActive.is_contract_violation());
        assert!(DatabaseError::invalid_argument("class id 70000").is_contract_violation());
        assert!(!DatabaseError::not_found("onu-1").is_contract_violation());
        assert!(!DatabaseError::Storage(omci_storage::StorageError::Closed).is_contract_violation());
    }

    #[test]
    fn display() {
        assert_eq!(
            DatabaseError::not_found("onu-1").to_string(),
            "device not found: onu-1"
        );
    }
}
