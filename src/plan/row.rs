//! Plan nodes for per-row operators

use std::sync::Arc;

use crate::datastore::Keyspace;
use crate::expression::ExprRef;

#[derive(Debug, Clone)]
pub struct Filter {
    pub condition: ExprRef,
}

#[derive(Debug, Clone)]
pub struct Limit {
    pub count: ExprRef,
}

#[derive(Debug, Clone)]
pub struct Offset {
    pub count: ExprRef,
}

/// Fetches the documents named by each row's key and binds them to `alias`.
#[derive(Debug, Clone)]
pub struct Fetch {
    pub keyspace: Arc<dyn Keyspace>,
    pub alias: String,
}

/// One `SET path = expr` or `UNSET path` term.
#[derive(Debug, Clone)]
pub struct SetTerm {
    /// Dotted path inside the document bound to the alias
    pub path: String,
    /// `None` unsets the path
    pub value: Option<ExprRef>,
}

impl SetTerm {
    pub fn set(path: &str, value: ExprRef) -> Self {
        Self {
            path: path.to_string(),
            value: Some(value),
        }
    }

    pub fn unset(path: &str) -> Self {
        Self {
            path: path.to_string(),
            value: None,
        }
    }
}

/// Applies SET/UNSET terms to the working copy of the document bound to `alias`.
#[derive(Debug, Clone)]
pub struct Set {
    pub alias: String,
    pub terms: Vec<SetTerm>,
}
