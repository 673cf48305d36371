//! Model error type.

use thiserror::Error;

/// Result type used across the model layer.
pub type ModelResult<T> = Result<T, ModelError>;

/// Model-level error.
///
/// Keep this focused on deterministic failures of the data shapes themselves
/// (parsing, encoding). Store failures belong to the storage crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A value could not be encoded for storage.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A stored value could not be decoded.
    #[error("decoding failed: {0}")]
    Decoding(String),
}

impl ModelError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn decoding(msg: impl Into<String>) -> Self {
        Self::Decoding(msg.into())
    }
}
