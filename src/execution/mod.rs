//! Operator runtime
//!
//! Operators form a plan-shaped tree. Each one runs on its own thread,
//! reads rows from its input exchange and writes rows to its output
//! exchange; stop travels top-down along owned-child edges.
//!
//! - [`Operator`], [`OperatorBase`] and [`Child`]: lifecycle, wiring, batching
//! - Composition: [`Sequence`], [`Parallel`], [`Filter`], [`Limit`], [`Offset`]
//! - Document access: [`Fetch`], [`CloneDocument`], [`Set`]
//! - [`scan`], [`join`], [`dml`]: the operator families
//! - [`execute`] and [`ExecutionHandle`]: running a whole tree

mod base;
mod batch;
mod driver;
mod errors;
mod eval;
mod fetch;
mod filter;
mod limit;
mod operator;
mod parallel;
mod sequence;
mod set;
mod stats;

pub mod dml;
pub mod join;
pub mod scan;

pub use base::{ChildLink, OperatorBase};
pub use batch::BatchSizer;
pub use driver::{execute, ExecutionHandle, QueryOutcome};
pub use errors::{ExecutionError, ExecutionResult, Severity};
pub use fetch::Fetch;
pub use filter::Filter;
pub use limit::{Limit, Offset};
pub use operator::{consume, run_operator, Child, Operator};
pub use parallel::Parallel;
pub use sequence::Sequence;
pub use set::{CloneDocument, Set};
pub use stats::{OperatorState, OperatorStats};
