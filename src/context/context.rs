//! Execution context shared by all operators of one request

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::phase::PhaseCounters;
use super::quota::MemoryQuota;
use crate::datastore::DatastoreError;
use crate::execution::{ExecutionError, ExecutionResult};
use crate::observability::{log_event_with_fields, Event};
use crate::value::BatchPool;

/// Context carried by every operator of a request.
#[derive(Debug)]
pub struct ExecContext {
    /// Request ID for tracing
    request_id: Uuid,
    started_at: DateTime<Utc>,
    config: PipelineConfig,
    quota: MemoryQuota,
    phases: PhaseCounters,
    batch_pool: BatchPool,
    errors: Mutex<Vec<ExecutionError>>,
    warnings: Mutex<Vec<ExecutionError>>,
    fatal: AtomicBool,
    mutations: AtomicU64,
}

impl ExecContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            quota: MemoryQuota::new(config.memory_quota),
            config,
            phases: PhaseCounters::new(),
            batch_pool: BatchPool::new(),
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            fatal: AtomicBool::new(false),
            mutations: AtomicU64::new(0),
        }
    }

    /// A context ready to be shared across operator threads.
    pub fn shared(config: PipelineConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn quota(&self) -> &MemoryQuota {
        &self.quota
    }

    pub fn phases(&self) -> &PhaseCounters {
        &self.phases
    }

    pub fn batch_pool(&self) -> &BatchPool {
        &self.batch_pool
    }

    pub fn is_transactional(&self) -> bool {
        self.config.transactional
    }

    pub fn max_parallelism(&self) -> usize {
        self.config.max_parallelism.max(1)
    }

    /// Records an error or warning. Fatal errors mark the request as failed.
    pub fn error(&self, err: ExecutionError) {
        if err.is_warning() {
            self.warnings.lock().push(err);
            return;
        }
        if err.is_fatal() {
            self.fatal.store(true, Ordering::Release);
        }
        self.errors.lock().push(err);
    }

    /// Records a warning regardless of the error's own severity.
    pub fn warning(&self, err: ExecutionError) {
        self.warnings.lock().push(err);
    }

    /// Reports the storage errors of one mutation batch.
    ///
    /// Returns whether the operator may continue: inside a transaction any
    /// storage error is fatal, outside one the run continues with partial success.
    pub fn report_storage_errors(&self, operator: &str, errors: Vec<DatastoreError>) -> bool {
        if errors.is_empty() {
            return true;
        }
        let count = errors.len().to_string();
        log_event_with_fields(
            Event::MutationBatchFailed,
            &[("operator", operator), ("errors", &count)],
        );
        let transactional = self.is_transactional();
        let mut sink = self.errors.lock();
        for err in errors {
            sink.push(ExecutionError::storage(operator, err));
        }
        if transactional {
            self.fatal.store(true, Ordering::Release);
        }
        !transactional
    }

    /// Charges `bytes` against the request's memory quota.
    pub fn track_memory(&self, bytes: usize) -> ExecutionResult<()> {
        self.quota.track(bytes as u64).map_err(|err| {
            let requested = bytes.to_string();
            log_event_with_fields(Event::QuotaExceeded, &[("requested", &requested)]);
            err
        })
    }

    pub fn release_memory(&self, bytes: usize) {
        self.quota.release(bytes as u64);
    }

    /// Reports a panic caught at an operator's top level.
    pub fn recover(&self, operator: &str, payload: Box<dyn Any + Send>) {
        let err = ExecutionError::panic(operator, payload.as_ref());
        let message = err.to_string();
        log_event_with_fields(
            Event::OperatorPanicRecovered,
            &[("operator", operator), ("message", &message)],
        );
        self.error(err);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> Vec<ExecutionError> {
        self.errors.lock().clone()
    }

    pub fn warnings(&self) -> Vec<ExecutionError> {
        self.warnings.lock().clone()
    }

    pub fn add_mutations(&self, count: u64) {
        self.mutations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
