use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Operation '{operation}' is not supported for storage type {storage_type}")]
    UnsupportedOperation {
        operation: &'static str,
        storage_type: String,
    },

    #[error("Type mismatch for '{key}': expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Storage property not found: {0}")]
    UnknownProperty(String),

    #[error("Could not find a free key for duplicate property: {0}")]
    DuplicateKey(String),

    #[error("Store not found: {0}")]
    StoreNotFound(u64),

    #[error("Store {0} is owned by another user")]
    NotOwner(u64),

    #[error("Sync entity '{0}' has been destroyed")]
    EntityDestroyed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl SyncError {
    pub fn unsupported(operation: &'static str, storage_type: impl ToString) -> Self {
        SyncError::UnsupportedOperation {
            operation,
            storage_type: storage_type.to_string(),
        }
    }

    /// Errors that indicate a setup mistake rather than a runtime condition.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SyncError::UnsupportedOperation { .. }
                | SyncError::TypeMismatch { .. }
                | SyncError::DuplicateKey(_)
                | SyncError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::unsupported("cubic", "String");
        assert_eq!(
            err.to_string(),
            "Operation 'cubic' is not supported for storage type String"
        );
        assert!(err.is_configuration_error());
        assert!(!SyncError::Transport("offline".to_string()).is_configuration_error());
    }
}
