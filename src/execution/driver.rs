//! Request driver
//!
//! Starts a root operator on its own thread, hands its rows to the caller
//! and tears the tree down once the output is drained or the request is
//! cancelled.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use super::errors::ExecutionError;
use super::operator::{Child, Operator};
use super::stats::OperatorStats;
use crate::context::ExecContext;
use crate::exchange::ValueExchange;
use crate::observability::{log_event_with_fields, Event};
use crate::value::AnnotatedValue;

/// Everything a finished request produced.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<Value>,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub error_details: Vec<ExecutionError>,
    pub warnings: Vec<String>,
    pub mutations: u64,
    pub stats: OperatorStats,
    /// A fatal error inside a transaction discarded the statement's rows
    pub aborted: bool,
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        self.error_details.is_empty()
    }

    /// Error codes in the order they were reported.
    pub fn error_codes(&self) -> Vec<&'static str> {
        self.error_details.iter().map(ExecutionError::code).collect()
    }
}

/// A running request.
pub struct ExecutionHandle {
    root: Child,
    output: Arc<ValueExchange>,
    ctx: Arc<ExecContext>,
    started: Instant,
    cancelled: bool,
}

impl ExecutionHandle {
    /// Starts `root` with no parent value.
    pub fn start(root: Box<dyn Operator>, ctx: Arc<ExecContext>) -> Self {
        let mut root = Child::new(root);
        let output = root.output();
        root.start(&ctx, None);
        Self {
            root,
            output,
            ctx,
            started: Instant::now(),
            cancelled: false,
        }
    }

    pub fn context(&self) -> &Arc<ExecContext> {
        &self.ctx
    }

    /// The next result row with its envelope, or `None` once the root
    /// finished or stopped.
    pub fn next_item(&mut self) -> Option<AnnotatedValue> {
        self.output.receive()
    }

    pub fn next_row(&mut self) -> Option<Value> {
        self.next_item().map(AnnotatedValue::into_value)
    }

    /// Stops the whole tree. Rows not yet received are discarded.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        let request = self.ctx.request_id().to_string();
        log_event_with_fields(Event::RequestCancelled, &[("request_id", &request)]);
        self.root.stop();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Drains the remaining rows, waits for every operator and tears the
    /// tree down.
    pub fn finish(mut self) -> QueryOutcome {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row() {
            rows.push(row);
        }
        self.root.wait();
        let stats = self.root.stats();
        self.root.done();

        let aborted = self.ctx.is_transactional() && self.ctx.has_fatal();
        if aborted {
            rows.clear();
        }
        let error_details = self.ctx.errors();
        let warnings = self.ctx.warnings();
        let outcome = QueryOutcome {
            rows,
            errors: error_details.iter().map(ToString::to_string).collect(),
            error_details,
            warnings: warnings.iter().map(ToString::to_string).collect(),
            mutations: self.ctx.mutation_count(),
            stats,
            aborted,
        };

        let request = self.ctx.request_id().to_string();
        let elapsed_us = self.started.elapsed().as_micros().to_string();
        let row_count = outcome.rows.len().to_string();
        let error_count = outcome.errors.len().to_string();
        log_event_with_fields(
            Event::RequestComplete,
            &[
                ("request_id", &request),
                ("rows", &row_count),
                ("errors", &error_count),
                ("elapsed_us", &elapsed_us),
            ],
        );
        outcome
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("request_id", &self.ctx.request_id())
            .field("root", &self.root)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

/// Runs `root` to completion and collects its outcome.
pub fn execute(root: Box<dyn Operator>, ctx: Arc<ExecContext>) -> QueryOutcome {
    ExecutionHandle::start(root, ctx).finish()
}
