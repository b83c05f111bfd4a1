//! Join and nest plan nodes

use std::sync::Arc;

use crate::datastore::{Index, Keyspace};
use crate::expression::ExprRef;

/// Whether matches are emitted one row each or gathered into an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Join,
    Nest,
}

/// Nested-loop join or nest against an inner operator subtree.
#[derive(Debug, Clone)]
pub struct NestedLoop {
    pub kind: JoinKind,
    /// Field the inner document is bound to
    pub alias: String,
    pub outer: bool,
    pub on_clause: Option<ExprRef>,
    /// Applied to joined rows after the ON clause
    pub filter: Option<ExprRef>,
}

/// Hash join or nest. The inner child is the build side.
#[derive(Debug, Clone)]
pub struct HashJoin {
    pub kind: JoinKind,
    pub alias: String,
    pub outer: bool,
    /// Evaluated on each build-side row
    pub build_exprs: Vec<ExprRef>,
    /// Evaluated on each outer row
    pub probe_exprs: Vec<ExprRef>,
    pub on_clause: Option<ExprRef>,
    pub filter: Option<ExprRef>,
}

/// Index join or nest: look up inner keys through a secondary index.
#[derive(Debug, Clone)]
pub struct IndexJoin {
    pub kind: JoinKind,
    pub alias: String,
    pub outer: bool,
    pub keyspace: Arc<dyn Keyspace>,
    pub index: Arc<dyn Index>,
    /// Evaluated on the outer row; the value looked up in the index
    pub key_expr: ExprRef,
    /// Cover names of the entry key positions. Non-empty skips the fetch.
    pub covers: Vec<String>,
    pub on_clause: Option<ExprRef>,
}
