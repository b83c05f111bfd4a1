//! Storage and index capabilities consumed by the engine
//!
//! The engine does not implement storage. It calls a [`Keyspace`] to fetch and
//! mutate documents and an [`Index`] or [`SearchIndex`] to stream entries into
//! an [`IndexConnection`]. The in-memory implementations in this module back
//! tests and embedded use.

mod connection;
mod errors;
mod memory;
mod scan;

use std::fmt;

use serde_json::Value;

use crate::value::AnnotatedValue;

pub use connection::IndexConnection;
pub use errors::{DatastoreError, DatastoreResult};
pub use memory::{MemoryIndex, MemoryKeyspace, MemorySearchIndex};
pub use scan::{IndexEntry, Inclusion, ResumePoint, ScanRequest, SearchRequest, Span};

/// One document to write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPair {
    pub key: String,
    pub value: Value,
    pub options: Option<Value>,
}

impl MutationPair {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            options: None,
        }
    }
}

/// Result of one batched mutation call.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    /// Documents actually written
    pub count: u64,
    /// The pairs that succeeded
    pub pairs: Vec<MutationPair>,
    /// Per-document failures
    pub errors: Vec<DatastoreError>,
}

/// Documents returned by a multi-key fetch plus per-key failures.
/// Keys that do not exist are simply absent from `docs`.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub docs: Vec<AnnotatedValue>,
    pub errors: Vec<DatastoreError>,
}

/// A collection of documents addressed by key.
pub trait Keyspace: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Fetches the documents for `keys`. Each returned value carries its key in
    /// its metadata.
    fn fetch(&self, keys: &[String]) -> FetchOutcome;

    fn insert(&self, pairs: Vec<MutationPair>) -> MutationOutcome;

    fn upsert(&self, pairs: Vec<MutationPair>) -> MutationOutcome;

    fn update(&self, pairs: Vec<MutationPair>) -> MutationOutcome;

    fn delete(&self, pairs: Vec<MutationPair>) -> MutationOutcome;
}

/// An ordered index over a keyspace.
pub trait Index: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn is_primary(&self) -> bool;

    /// Streams matching entries into `conn` in index order, then returns.
    ///
    /// Implementations stop early when `conn` refuses an entry, and report a
    /// timeout with [`IndexConnection::send_timeout`].
    fn scan(&self, request: &ScanRequest, conn: &IndexConnection);
}

/// A full-text search index.
pub trait SearchIndex: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Streams hits into `conn`; each entry's `meta` carries the search metadata.
    fn search(&self, request: &SearchRequest, conn: &IndexConnection);
}
