//! Scan operators
//!
//! Leaf scans turn index entries or literal keys into keyed rows. Set scans
//! combine child scans by document key, using per-row provenance bits to
//! know which children produced a key.

mod driver;
mod index;
mod intersect;
mod keyset;
mod primary;
mod search;
mod source;
mod union;

pub use index::IndexScan;
pub use intersect::{IntersectScan, OrderedIntersectScan};
pub use primary::PrimaryScan;
pub use search::SearchScan;
pub use source::{DummyScan, ExpressionScan, KeyScan};
pub use union::{DistinctScan, UnionScan, MAX_SET_CHILDREN};

pub(crate) use driver::scan_entries;
