//! Exchanges: the bounded queues connecting operators
//!
//! An exchange carries documents between two neighbouring operators and, on a
//! separate side-channel, child-completion notifications from any number of
//! children to one parent.
//!
//! # Invariants
//!
//! - FIFO: items are received in the order they were sent
//! - `0 <= len <= capacity`; a sender blocks exactly while the buffer is full
//! - `closed` and `stopped` are monotonic until an explicit `reset()`
//! - stop dominates: once set, every blocked and future send/receive fails,
//!   regardless of buffered content
//!
//! A single mutex guards the buffer, the side-channel and the waiter counts, so
//! there is no lock ordering between two neighbours to get wrong. Waiters park
//! on a condition variable with the lock released and re-check stop first
//! thing after waking.

mod exchange;
mod stop;

pub use exchange::{Exchange, Received, ValueExchange};
pub use stop::{StopHandle, StopNode, Stoppable};
