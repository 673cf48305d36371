//! Storage error model.
//!
//! ## Error Mapping
//!
//! | Source | StorageError | Scenario |
//! |--------|--------------|----------|
//! | input validation | `Argument` | empty key/name/id, inverted range, non-positive timeout |
//! | queue registry | `Configuration` | a dequeue spans more than one queue backend |
//! | any `sqlx::Error` | `Store` | transport, I/O, constraint and decoding failures |
//! | `ModelError::Encoding` | `Serialization` | a payload could not be encoded for storage |
//! | lock acquisition | `LockTimeout` | the lock was not acquired within the bound |
//!
//! Store errors are never retried here; retry policy belongs to the caller.

use std::time::Duration;

use thiserror::Error;

use jobvault_core::ModelError;

/// Result type used across the storage layer.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid input, detected before any statement was issued.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The storage was asked to do something its configuration cannot satisfy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The relational store failed or was unreachable.
    #[error("store unavailable during {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("timed out after {timeout:?} waiting for lock on '{resource}'")]
    LockTimeout { resource: String, timeout: Duration },

    /// The cancellation signal fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// A lease (fetched job or lock) is no longer held by this handle.
    #[error("lease lost: {0}")]
    LostLease(String),
}

impl StorageError {
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap a `sqlx` failure with the operation that hit it.
    pub fn store(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Store { operation, source }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<ModelError> for StorageError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidId(msg) => Self::Argument(msg),
            ModelError::Encoding(msg) | ModelError::Decoding(msg) => Self::Serialization(msg),
        }
    }
}

/// Map `sqlx` errors of one operation into `StorageError::Store`.
pub(crate) fn store_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |source| StorageError::store(operation, source)
}

/// Reject empty or whitespace-only identifiers before touching the store.
pub(crate) fn require_non_empty(what: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::argument(format!("{what} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_map_to_storage_categories() {
        let err: StorageError = ModelError::invalid_id("JobId: empty").into();
        assert!(err.is_argument());

        let err: StorageError = ModelError::encoding("bad").into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn blank_identifiers_are_rejected() {
        assert!(require_non_empty("key", "").unwrap_err().is_argument());
        assert!(require_non_empty("key", " \t").unwrap_err().is_argument());
        assert!(require_non_empty("key", "recurring-jobs").is_ok());
    }

    #[test]
    fn lock_timeout_names_resource() {
        let err = StorageError::LockTimeout {
            resource: "expiration-manager".into(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("expiration-manager"));
    }
}
