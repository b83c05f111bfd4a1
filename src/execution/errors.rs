//! Execution error types
//!
//! Error codes:
//! - AERO_EXEC_EVALUATION (ERROR)
//! - AERO_EXEC_STORAGE (ERROR, fatal inside a transaction)
//! - AERO_EXEC_INTERNAL (FATAL)
//! - AERO_EXEC_SCAN_TIMEOUT (FATAL)
//! - AERO_EXEC_QUOTA_EXCEEDED (FATAL)
//! - AERO_EXEC_MERGE_MULTI_UPDATE (ERROR)
//! - AERO_EXEC_MERGE_MULTI_INSERT (ERROR)
//! - AERO_EXEC_MISSING_KEY (WARNING)
//! - AERO_EXEC_PANIC (FATAL)
//!
//! Cancellation is a cooperative stop and has no error.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::datastore::DatastoreError;

/// Severity levels for execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Reported with the response, execution unaffected
    Warning,
    /// The owning operator's item or run failed
    Error,
    /// The statement cannot complete correctly
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors raised while executing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("evaluation failed in {operator}: {message}")]
    Evaluation { operator: String, message: String },

    #[error("storage error in {operator}: {source}")]
    Storage {
        operator: String,
        source: DatastoreError,
    },

    #[error("internal error in {operator}: {message}")]
    Internal { operator: String, message: String },

    #[error("scan of index {index} timed out: {message}")]
    ScanTimeout { index: String, message: String },

    #[error("memory quota exceeded: requested {requested} bytes with {used} of {limit} in use")]
    QuotaExceeded { requested: u64, used: u64, limit: u64 },

    #[error("MERGE cannot update or delete document {key} more than once")]
    MergeMultiUpdate { key: String },

    #[error("MERGE cannot insert document {key} more than once")]
    MergeMultiInsert { key: String },

    #[error("document {key} not found in {keyspace}")]
    MissingKey { keyspace: String, key: String },

    #[error("operator {operator} failed unexpectedly: {message}")]
    Panic { operator: String, message: String },
}

impl ExecutionError {
    pub fn evaluation(operator: &str, message: impl Into<String>) -> Self {
        Self::Evaluation {
            operator: operator.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(operator: &str, source: DatastoreError) -> Self {
        Self::Storage {
            operator: operator.to_string(),
            source,
        }
    }

    pub fn internal(operator: &str, message: impl Into<String>) -> Self {
        Self::Internal {
            operator: operator.to_string(),
            message: message.into(),
        }
    }

    pub fn scan_timeout(index: &str, message: impl Into<String>) -> Self {
        Self::ScanTimeout {
            index: index.to_string(),
            message: message.into(),
        }
    }

    pub fn missing_key(keyspace: &str, key: impl Into<String>) -> Self {
        Self::MissingKey {
            keyspace: keyspace.to_string(),
            key: key.into(),
        }
    }

    /// A panic caught around `operator`, with the payload's message when it
    /// carries one.
    pub fn panic(operator: &str, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panic {
            operator: operator.to_string(),
            message,
        }
    }

    /// Returns the string code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Evaluation { .. } => "AERO_EXEC_EVALUATION",
            Self::Storage { .. } => "AERO_EXEC_STORAGE",
            Self::Internal { .. } => "AERO_EXEC_INTERNAL",
            Self::ScanTimeout { .. } => "AERO_EXEC_SCAN_TIMEOUT",
            Self::QuotaExceeded { .. } => "AERO_EXEC_QUOTA_EXCEEDED",
            Self::MergeMultiUpdate { .. } => "AERO_EXEC_MERGE_MULTI_UPDATE",
            Self::MergeMultiInsert { .. } => "AERO_EXEC_MERGE_MULTI_INSERT",
            Self::MissingKey { .. } => "AERO_EXEC_MISSING_KEY",
            Self::Panic { .. } => "AERO_EXEC_PANIC",
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingKey { .. } => Severity::Warning,
            Self::Evaluation { .. }
            | Self::Storage { .. }
            | Self::MergeMultiUpdate { .. }
            | Self::MergeMultiInsert { .. } => Severity::Error,
            Self::Internal { .. }
            | Self::ScanTimeout { .. }
            | Self::QuotaExceeded { .. }
            | Self::Panic { .. } => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_warning(&self) -> bool {
        self.severity() == Severity::Warning
    }
}
