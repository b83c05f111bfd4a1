//! Per-request memory quota
//!
//! Operators that materialize documents (hash tables, key sets, batches)
//! charge their size here and release it when they drop the documents.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::execution::{ExecutionError, ExecutionResult};

/// Tracks bytes held by a request against an optional limit.
#[derive(Debug, Default)]
pub struct MemoryQuota {
    limit: u64,
    used: AtomicU64,
    peak: AtomicU64,
}

impl MemoryQuota {
    /// A quota of `limit` bytes. Zero means unlimited.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Charges `bytes`. If that would exceed the limit, nothing stays charged.
    pub fn track(&self, bytes: u64) -> ExecutionResult<()> {
        let now = self.used.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if self.limit > 0 && now > self.limit {
            self.used.fetch_sub(bytes, Ordering::AcqRel);
            return Err(ExecutionError::QuotaExceeded {
                requested: bytes,
                used: now - bytes,
                limit: self.limit,
            });
        }
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    /// Returns `bytes` previously charged.
    pub fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}
