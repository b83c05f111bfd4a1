//! Index scan driver with chunked continuation
//!
//! The index streams into an [`IndexConnection`] from a producer thread while
//! the scan operator consumes on its own thread. When the index reports a
//! timeout the driver starts a fresh scan strictly after the last delivered
//! entry, provided the request carries nothing a resumed scan cannot
//! reproduce (an offset, an ordering requirement, pushed-down aggregates).
//! Otherwise the timeout is fatal.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::context::ExecContext;
use crate::datastore::{Index, IndexConnection, IndexEntry, ResumePoint, ScanRequest, SearchIndex, SearchRequest};
use crate::execution::base::OperatorBase;
use crate::execution::errors::ExecutionError;
use crate::observability::{log_event_with_fields, Event};
use crate::value::{AnnotatedValue, DocumentMeta};

/// Where entries come from.
#[derive(Debug, Clone)]
pub(crate) enum ScanSource {
    Index {
        index: Arc<dyn Index>,
        request: ScanRequest,
    },
    Search {
        index: Arc<dyn SearchIndex>,
        request: SearchRequest,
    },
}

impl ScanSource {
    fn name(&self) -> &str {
        match self {
            ScanSource::Index { index, .. } => index.name(),
            ScanSource::Search { index, .. } => index.name(),
        }
    }

    fn spawn(&self, conn: &Arc<IndexConnection>) -> std::io::Result<JoinHandle<()>> {
        let conn = Arc::clone(conn);
        let source = self.clone();
        thread::Builder::new()
            .name(format!("aerodb-scan-{}", self.name()))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &source {
                    ScanSource::Index { index, request } => index.scan(request, &conn),
                    ScanSource::Search { index, request } => index.search(request, &conn),
                }));
                match outcome {
                    // an index that returns without an end marker still ends the stream
                    Ok(()) => conn.close(),
                    Err(payload) => conn.send_panic(payload),
                }
            })
    }

    /// Rewrites the request to continue after `resume`. Search scans cannot resume.
    fn resume(&mut self, resume: Option<ResumePoint>, remaining: Option<u64>) -> bool {
        match self {
            ScanSource::Index { request, .. } => {
                if resume.is_some() {
                    request.resume_after = resume;
                }
                request.limit = remaining;
                true
            }
            ScanSource::Search { .. } => false,
        }
    }
}

/// How to turn entries into rows and when to stop.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScanShape {
    /// Cover names for entry key positions; empty means not covering
    pub covers: Vec<String>,
    /// Drop repeated document keys
    pub distinct: bool,
    /// Rows to skip locally (offset not pushed to the index)
    pub local_offset: u64,
    /// Rows to emit at most
    pub limit: Option<u64>,
    /// A timeout may be recovered by resuming
    pub resumable: bool,
}

/// Joins the producer thread and reports a panic raised by the index.
/// Returns `false` if it panicked.
fn join_producer(base: &OperatorBase, ctx: &ExecContext, conn: &IndexConnection, producer: JoinHandle<()>) -> bool {
    let escaped = producer.join().err();
    match conn.take_panic().or(escaped) {
        Some(payload) => {
            ctx.recover(base.name(), payload);
            false
        }
        None => true,
    }
}

/// Converts an index entry to the row a scan emits.
pub(crate) fn entry_to_row(entry: IndexEntry, covers: &[String]) -> AnnotatedValue {
    let mut row = AnnotatedValue::with_meta(Value::Object(Map::new()), DocumentMeta::with_id(entry.primary_key));
    if !covers.is_empty() {
        let map: Map<String, Value> = covers.iter().cloned().zip(entry.entry_key).collect();
        row.attachments_mut().covers = Some(map);
    }
    if let Some(meta) = entry.meta {
        row.attachments_mut().search_meta = Some(meta);
    }
    row
}

/// Streams the source into the operator's output. Returns `true` when the scan
/// ran to its end or its limit, `false` when it stopped or failed.
pub(crate) fn drive_scan(
    base: &mut OperatorBase,
    ctx: &Arc<ExecContext>,
    mut source: ScanSource,
    shape: &ScanShape,
) -> bool {
    let capacity = base.output().capacity();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut to_skip = shape.local_offset;
    let mut emitted: u64 = 0;
    let mut last: Option<ResumePoint> = None;

    loop {
        let conn = IndexConnection::new(capacity);
        let token = base.stop_handle().attach(conn.clone());
        let producer = match source.spawn(&conn) {
            Ok(handle) => handle,
            Err(err) => {
                base.stop_handle().detach(token);
                ctx.error(ExecutionError::internal(base.name(), format!("cannot start scan: {err}")));
                return false;
            }
        };

        let mut chunk_entries = 0u64;
        let mut halted = false;
        let mut limit_hit = false;
        while let Some(entry) = base.time_service(|| conn.receive()) {
            base.add_in_docs(1);
            chunk_entries += 1;
            let resume = ResumePoint {
                entry_key: entry.entry_key.clone(),
                primary_key: entry.primary_key.clone(),
            };
            if shape.distinct && !seen.insert(entry.primary_key.clone()) {
                last = Some(resume);
                continue;
            }
            last = Some(resume);
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            if !base.send(entry_to_row(entry, &shape.covers)) {
                halted = true;
                break;
            }
            emitted += 1;
            if shape.limit.is_some_and(|limit| emitted >= limit) {
                limit_hit = true;
                break;
            }
        }
        if halted || limit_hit {
            conn.stop();
        }
        let clean = join_producer(base, ctx, &conn, producer);
        base.stop_handle().detach(token);
        if !clean {
            return false;
        }

        if let Some(err) = conn.take_error() {
            ctx.error(ExecutionError::storage(base.name(), err));
            return false;
        }
        if halted || base.is_stopped() {
            base.mark_stopping();
            return false;
        }
        if limit_hit || !conn.timed_out() {
            return true;
        }

        let index_name = source.name().to_string();
        let delivered = emitted.to_string();
        if !shape.resumable || chunk_entries == 0 {
            log_event_with_fields(
                Event::ScanTimeoutFatal,
                &[("index", &index_name), ("delivered", &delivered)],
            );
            let reason = if shape.resumable {
                "no progress before timeout"
            } else {
                "scan cannot be resumed"
            };
            ctx.error(ExecutionError::scan_timeout(&index_name, reason));
            return false;
        }
        let remaining = if shape.distinct {
            None
        } else {
            shape.limit.map(|limit| limit - emitted)
        };
        if !source.resume(last.clone(), remaining) {
            ctx.error(ExecutionError::scan_timeout(&index_name, "scan cannot be resumed"));
            return false;
        }
        log_event_with_fields(
            Event::ScanTimeoutResumed,
            &[("index", &index_name), ("delivered", &delivered)],
        );
    }
}

/// Runs one scan to completion and collects its entries. Used for point
/// lookups, which are not resumed. `None` means the scan failed or stopped;
/// failures are already reported.
pub(crate) fn scan_entries(
    base: &mut OperatorBase,
    ctx: &Arc<ExecContext>,
    index: &Arc<dyn Index>,
    request: ScanRequest,
) -> Option<Vec<IndexEntry>> {
    let source = ScanSource::Index {
        index: Arc::clone(index),
        request,
    };
    let conn = IndexConnection::new(base.output().capacity());
    let token = base.stop_handle().attach(conn.clone());
    let producer = match source.spawn(&conn) {
        Ok(handle) => handle,
        Err(err) => {
            base.stop_handle().detach(token);
            ctx.error(ExecutionError::internal(base.name(), format!("cannot start scan: {err}")));
            return None;
        }
    };
    let mut entries = Vec::new();
    while let Some(entry) = base.time_service(|| conn.receive()) {
        entries.push(entry);
    }
    let clean = join_producer(base, ctx, &conn, producer);
    base.stop_handle().detach(token);
    if !clean {
        return None;
    }
    if let Some(err) = conn.take_error() {
        ctx.error(ExecutionError::storage(base.name(), err));
        return None;
    }
    if conn.timed_out() {
        log_event_with_fields(Event::ScanTimeoutFatal, &[("index", index.name())]);
        ctx.error(ExecutionError::scan_timeout(index.name(), "point lookup timed out"));
        return None;
    }
    if base.is_stopped() {
        return None;
    }
    Some(entries)
}
