//! Scan plan nodes

use std::sync::Arc;

use crate::datastore::{Index, SearchIndex, Span};
use crate::expression::ExprRef;

/// Full scan of a primary index.
#[derive(Debug, Clone)]
pub struct PrimaryScan {
    pub index: Arc<dyn Index>,
    pub limit: Option<ExprRef>,
    pub offset: Option<ExprRef>,
}

impl PrimaryScan {
    pub fn new(index: Arc<dyn Index>) -> Self {
        Self {
            index,
            limit: None,
            offset: None,
        }
    }

    pub fn with_limit(mut self, limit: ExprRef) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: ExprRef) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Range scan of a secondary index.
#[derive(Debug, Clone)]
pub struct IndexScan {
    pub index: Arc<dyn Index>,
    pub spans: Vec<Span>,
    pub limit: Option<ExprRef>,
    pub offset: Option<ExprRef>,
    /// Projection names for the entry key positions. Non-empty means the scan
    /// covers the query and rows carry the entry key as covers.
    pub covers: Vec<String>,
    /// Suppress duplicate document keys (array indexes emit one entry per element)
    pub distinct: bool,
    /// Rows must come back in index order
    pub ordered: bool,
    /// Grouping and aggregation are pushed into the scan
    pub group_aggregates: bool,
}

impl IndexScan {
    pub fn new(index: Arc<dyn Index>, spans: Vec<Span>) -> Self {
        Self {
            index,
            spans,
            limit: None,
            offset: None,
            covers: Vec::new(),
            distinct: false,
            ordered: false,
            group_aggregates: false,
        }
    }

    pub fn with_limit(mut self, limit: ExprRef) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: ExprRef) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn covering(mut self, names: &[&str]) -> Self {
        self.covers = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn with_group_aggregates(mut self) -> Self {
        self.group_aggregates = true;
        self
    }
}

/// Full-text search over a search index.
#[derive(Debug, Clone)]
pub struct SearchScan {
    pub index: Arc<dyn SearchIndex>,
    pub query: ExprRef,
    pub limit: Option<ExprRef>,
    pub offset: Option<ExprRef>,
}

/// Union or distinct over child scans, deduplicating by document key.
#[derive(Debug, Clone, Default)]
pub struct SetScan {
    pub limit: Option<ExprRef>,
    pub offset: Option<ExprRef>,
}

/// Intersection of child scans by document key.
#[derive(Debug, Clone, Default)]
pub struct IntersectScan {
    pub limit: Option<ExprRef>,
}

/// One row per element of an array expression, bound to `alias`.
#[derive(Debug, Clone)]
pub struct ExpressionScan {
    pub expr: ExprRef,
    pub alias: String,
}

/// Rows for explicit document keys (`USE KEYS`).
#[derive(Debug, Clone)]
pub struct KeyScan {
    /// A string or an array of strings
    pub keys: ExprRef,
    pub distinct: bool,
}
