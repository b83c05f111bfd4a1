//! Storage and index capability errors
//!
//! Error codes:
//! - AERO_STORE_KEY_EXISTS
//! - AERO_STORE_KEY_NOT_FOUND
//! - AERO_STORE_SCAN_FAILED
//! - AERO_STORE_FAILURE

use thiserror::Error;

/// Result type for storage/index calls
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Errors reported by a keyspace or index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("document {key} already exists")]
    KeyExists { key: String },

    #[error("document {key} not found")]
    KeyNotFound { key: String },

    #[error("scan of index {index} failed: {message}")]
    ScanFailed { index: String, message: String },

    #[error("storage failure: {message}")]
    Failure { key: Option<String>, message: String },
}

impl DatastoreError {
    pub fn key_exists(key: impl Into<String>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    pub fn scan_failed(index: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScanFailed {
            index: index.into(),
            message: message.into(),
        }
    }

    pub fn failure(key: Option<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            key,
            message: message.into(),
        }
    }

    /// The document key the error refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::KeyExists { key } | Self::KeyNotFound { key } => Some(key),
            Self::Failure { key, .. } => key.as_deref(),
            Self::ScanFailed { .. } => None,
        }
    }

    /// Returns the string code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyExists { .. } => "AERO_STORE_KEY_EXISTS",
            Self::KeyNotFound { .. } => "AERO_STORE_KEY_NOT_FOUND",
            Self::ScanFailed { .. } => "AERO_STORE_SCAN_FAILED",
            Self::Failure { .. } => "AERO_STORE_FAILURE",
        }
    }
}
