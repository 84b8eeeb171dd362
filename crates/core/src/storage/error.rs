use thiserror::Error;

/// Errors that can occur when reading or writing the backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },
    #[error("Write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },
}

impl StoreError {
    /// Builds a write failure for `key`.
    pub fn write_failed(key: &str, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Builds a read failure for `key`.
    pub fn read_failed(key: &str, reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for backing store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
