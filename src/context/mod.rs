//! Request context
//!
//! Everything an operator needs from the request it runs in: configuration,
//! the error/warning sink, memory-quota tracking, phase counters, the
//! mutation counter and the batch-buffer pool. One context is shared by every
//! operator of a request.

mod config;
mod context;
mod phase;
mod quota;

pub use config::{
    PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAX_PARALLELISM, DEFAULT_PIPELINE_CAPACITY,
};
pub use context::ExecContext;
pub use phase::{Phase, PhaseCounters, PhaseEntry, PhaseSnapshot};
pub use quota::MemoryQuota;
