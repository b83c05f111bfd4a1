//! Mutation plan nodes

use std::sync::Arc;

use crate::datastore::Keyspace;
use crate::expression::ExprRef;

/// Batched insert or upsert.
///
/// With no key expression the sender reads the `insert` attachment prepared
/// upstream.
#[derive(Debug, Clone)]
pub struct SendInsert {
    pub keyspace: Arc<dyn Keyspace>,
    pub alias: String,
    pub key: Option<ExprRef>,
    pub value: Option<ExprRef>,
    pub options: Option<ExprRef>,
    pub upsert: bool,
    pub limit: Option<ExprRef>,
}

impl SendInsert {
    /// Insert from the `insert` attachment.
    pub fn from_attachment(keyspace: Arc<dyn Keyspace>, alias: &str) -> Self {
        Self {
            keyspace,
            alias: alias.to_string(),
            key: None,
            value: None,
            options: None,
            upsert: false,
            limit: None,
        }
    }

    /// Insert `value` under `key`, both evaluated per row.
    pub fn with_exprs(keyspace: Arc<dyn Keyspace>, alias: &str, key: ExprRef, value: ExprRef) -> Self {
        Self {
            key: Some(key),
            value: Some(value),
            ..Self::from_attachment(keyspace, alias)
        }
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }
}

/// Batched update writing each row's `clone` attachment.
#[derive(Debug, Clone)]
pub struct SendUpdate {
    pub keyspace: Arc<dyn Keyspace>,
    pub alias: String,
    pub limit: Option<ExprRef>,
}

/// Batched delete of the document bound to `alias`.
#[derive(Debug, Clone)]
pub struct SendDelete {
    pub keyspace: Arc<dyn Keyspace>,
    pub alias: String,
    pub limit: Option<ExprRef>,
}

/// Insert branch of a MERGE.
#[derive(Debug, Clone)]
pub struct MergeInsert {
    /// Key of the new document; key-based MERGE defaults to the merge key
    pub key: Option<ExprRef>,
    pub value: ExprRef,
    pub options: Option<ExprRef>,
    pub condition: Option<ExprRef>,
}

/// MERGE of a source stream into a target keyspace.
#[derive(Debug, Clone)]
pub struct Merge {
    pub keyspace: Arc<dyn Keyspace>,
    /// Alias the target document is bound to
    pub alias: String,
    /// Key-based MERGE: evaluated on the source row to name the target.
    /// Without it the target is considered matched when the alias field is set.
    pub key: Option<ExprRef>,
    pub update_condition: Option<ExprRef>,
    pub delete_condition: Option<ExprRef>,
    pub insert: Option<MergeInsert>,
}
