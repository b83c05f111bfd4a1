//! Plan nodes
//!
//! Read-only descriptions of each operator's configuration. Operators hold a
//! plan node behind an `Arc` so parallel copies share it while allocating their
//! own mutable state.

mod dml;
mod join;
mod row;
mod scan;

pub use dml::{Merge, MergeInsert, SendDelete, SendInsert, SendUpdate};
pub use join::{HashJoin, IndexJoin, JoinKind, NestedLoop};
pub use row::{Fetch, Filter, Limit, Offset, Set, SetTerm};
pub use scan::{ExpressionScan, IndexScan, IntersectScan, KeyScan, PrimaryScan, SearchScan, SetScan};
