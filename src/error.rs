//! Error types for memoization operations
//!
//! This module defines the error type shared by the cache engine, the
//! persistence backends and the value codec.

use thiserror::Error;

/// Main error type for memoization operations
#[derive(Error, Debug)]
pub enum MemoError {
    /// The durable store could not be opened or reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A statement against an open store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A value could not be encoded or decoded for its declared kind
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A value kind name that the codec does not know
    #[error("Unsupported value kind: {0}")]
    UnsupportedKind(String),

    /// The computation's source text was missing, so it cannot be fingerprinted
    #[error("Fingerprint unavailable for '{0}': computation source is empty")]
    FingerprintUnavailable(String),

    /// Namespace name that cannot be used as a storage partition
    #[error("Invalid namespace '{0}': expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidNamespace(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The wrapped computation failed; the inner error is passed through unchanged
    #[error(transparent)]
    Computation(#[from] anyhow::Error),

    /// The handle was detached and no longer serves calls
    #[error("Computation '{0}' is detached")]
    Detached(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for memoization operations
pub type Result<T> = std::result::Result<T, MemoError>;

impl MemoError {
    /// Whether a failed store operation is worth repeating
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoError::StoreUnavailable(_) | MemoError::Storage(_))
    }
}

impl From<rusqlite::Error> for MemoError {
    fn from(e: rusqlite::Error) -> Self {
        MemoError::Storage(e.to_string())
    }
}

impl From<String> for MemoError {
    fn from(s: String) -> Self {
        MemoError::Other(s)
    }
}

impl From<&str> for MemoError {
    fn from(s: &str) -> Self {
        MemoError::Other(s.to_string())
    }
}
