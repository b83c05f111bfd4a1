//! Observable execution events
//!
//! Events are explicit and typed. Each has a stable name used as the
//! `event` field of the emitted log record.

use std::fmt;

/// Observable events raised by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Request lifecycle
    /// Root operator finished and results were collected
    RequestComplete,
    /// Request cancelled through its handle
    RequestCancelled,

    // Operator lifecycle
    /// An operator panicked and was recovered
    OperatorPanicRecovered,

    // Scans
    /// Index scan timed out and resumed from the last delivered entry
    ScanTimeoutResumed,
    /// Index scan timed out and could not be resumed (FATAL)
    ScanTimeoutFatal,

    // Joins
    /// Hash join build side fully loaded
    HashTableBuilt,

    // Resources
    /// Memory quota exceeded (FATAL)
    QuotaExceeded,

    // Mutations
    /// A mutation batch reported storage errors
    MutationBatchFailed,
    /// MERGE rejected a second action on the same key
    MergeConflict,
}

impl Event {
    /// Returns the stable event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RequestComplete => "REQUEST_COMPLETE",
            Event::RequestCancelled => "REQUEST_CANCELLED",
            Event::OperatorPanicRecovered => "OPERATOR_PANIC_RECOVERED",
            Event::ScanTimeoutResumed => "SCAN_TIMEOUT_RESUMED",
            Event::ScanTimeoutFatal => "SCAN_TIMEOUT_FATAL",
            Event::HashTableBuilt => "HASH_TABLE_BUILT",
            Event::QuotaExceeded => "QUOTA_EXCEEDED",
            Event::MutationBatchFailed => "MUTATION_BATCH_FAILED",
            Event::MergeConflict => "MERGE_CONFLICT",
        }
    }

    /// Fatal events abort the statement they occur in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::ScanTimeoutFatal | Event::QuotaExceeded)
    }

    /// Events that indicate something went wrong but execution continues.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::OperatorPanicRecovered | Event::MutationBatchFailed | Event::MergeConflict
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(Event::RequestComplete.as_str(), "REQUEST_COMPLETE");
        assert_eq!(Event::ScanTimeoutResumed.as_str(), "SCAN_TIMEOUT_RESUMED");
        assert_eq!(Event::MergeConflict.to_string(), "MERGE_CONFLICT");
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::ScanTimeoutFatal.is_fatal());
        assert!(Event::QuotaExceeded.is_fatal());
        assert!(!Event::ScanTimeoutResumed.is_fatal());
        assert!(!Event::RequestComplete.is_warning());
    }
}
