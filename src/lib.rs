//! aerodb-exec - Streaming query execution engine for aerodb
//!
//! Runs compiled query plans as a tree of concurrent operators connected by
//! bounded exchanges: scans, joins and nests, and mutation senders including
//! the MERGE orchestrator. Storage, indexes and expression evaluation are
//! consumed through the traits in [`datastore`] and [`expression`].

pub mod context;
pub mod datastore;
pub mod exchange;
pub mod execution;
pub mod expression;
pub mod observability;
pub mod plan;
pub mod value;
