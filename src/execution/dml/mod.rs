//! DML senders and the MERGE orchestrator
//!
//! Senders buffer one mutation pair per input row and write them in batches.
//! After each batch the rows whose writes succeeded are forwarded downstream,
//! storage errors are reported on the request context (fatal inside a
//! transaction) and the mutation count is added to the request.

mod delete;
mod insert;
mod merge;
mod update;

use std::fmt;

use rustc_hash::FxHashSet;

pub use delete::SendDelete;
pub use insert::SendInsert;
pub use merge::Merge;
pub use update::SendUpdate;

use crate::context::ExecContext;
use crate::datastore::{Keyspace, MutationOutcome, MutationPair};
use crate::execution::base::OperatorBase;
use crate::execution::eval::evaluate_count;
use crate::expression::ExprRef;
use crate::value::AnnotatedValue;

/// Storage call a sender issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Upsert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Upsert => "upsert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }

    fn apply(self, keyspace: &dyn Keyspace, pairs: Vec<MutationPair>) -> MutationOutcome {
        match self {
            MutationKind::Insert => keyspace.insert(pairs),
            MutationKind::Upsert => keyspace.upsert(pairs),
            MutationKind::Update => keyspace.update(pairs),
            MutationKind::Delete => keyspace.delete(pairs),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows awaiting a batched write, each paired with its mutation.
#[derive(Debug, Default)]
pub(crate) struct MutationBuffer {
    rows: Vec<AnnotatedValue>,
    pairs: Vec<MutationPair>,
    /// Mutations still allowed by the statement's LIMIT
    remaining: Option<u64>,
}

impl MutationBuffer {
    /// Evaluates the mutation limit for a new run. `false` means nothing may
    /// be written, either because the limit is zero or because it failed.
    pub fn start(
        &mut self,
        operator: &str,
        limit: Option<&ExprRef>,
        parent: Option<&AnnotatedValue>,
        ctx: &ExecContext,
    ) -> bool {
        self.clear();
        match evaluate_count(operator, limit, parent, ctx) {
            Ok(limit) => {
                self.remaining = limit;
                limit != Some(0)
            }
            Err(err) => {
                ctx.error(err);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the limit has been used up.
    pub fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    pub fn push(&mut self, row: AnnotatedValue, pair: MutationPair) {
        self.rows.push(row);
        self.pairs.push(pair);
        if let Some(remaining) = &mut self.remaining {
            *remaining = remaining.saturating_sub(1);
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.pairs.clear();
    }

    /// Writes the buffered pairs and forwards the rows the keyspace reports
    /// as written.
    /// Returns `false` when the run must stop.
    pub fn flush(
        &mut self,
        base: &mut OperatorBase,
        ctx: &ExecContext,
        keyspace: &dyn Keyspace,
        kind: MutationKind,
    ) -> bool {
        if self.pairs.is_empty() {
            return true;
        }
        let rows = std::mem::take(&mut self.rows);
        let pairs = std::mem::take(&mut self.pairs);
        let keys: Vec<String> = pairs.iter().map(|p| p.key.clone()).collect();
        let outcome = base.time_service(|| kind.apply(keyspace, pairs));
        ctx.add_mutations(outcome.count);
        let written: FxHashSet<String> = outcome.pairs.into_iter().map(|p| p.key).collect();
        if !ctx.report_storage_errors(base.name(), outcome.errors) {
            return false;
        }
        for (row, key) in rows.into_iter().zip(keys.iter()) {
            if !written.contains(key) {
                row.recycle();
                continue;
            }
            if !base.send(row) {
                return false;
            }
        }
        true
    }
}
