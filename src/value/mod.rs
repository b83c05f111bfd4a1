//! Document values as they flow between operators
//!
//! Every document in flight is an [`AnnotatedValue`]: the JSON body plus the
//! envelope operators use to talk to each other (provenance metadata, typed
//! attachments, a set-operation provenance bitmask and a size estimate used for
//! memory-quota accounting).
//!
//! # Ownership
//!
//! An annotated value is held by exactly one exchange slot or one operator batch
//! at a time. Moving it is the only way to hand it on, and [`AnnotatedValue::recycle`]
//! consumes it, so a released document cannot be touched again.

mod annotated;
mod collate;
mod pool;

pub use annotated::{estimate_size, AnnotatedValue, Attachments, DocumentMeta, InsertPayload};
pub use collate::{collate, collate_slices};
pub use pool::BatchPool;
