//! Connection an index streams its entries through
//!
//! The producer side is the index implementation running on its own thread;
//! the consumer side is the scan operator. The connection supports an early
//! stop from the consumer and a timeout signal from the producer.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::errors::DatastoreError;
use super::scan::IndexEntry;
use crate::exchange::{Exchange, Stoppable};

/// Bounded stream of index entries with end, timeout and error signals.
#[derive(Debug)]
pub struct IndexConnection {
    entries: Exchange<IndexEntry>,
    timed_out: AtomicBool,
    error: Mutex<Option<DatastoreError>>,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl IndexConnection {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Exchange::new(capacity),
            timed_out: AtomicBool::new(false),
            error: Mutex::new(None),
            panic: Mutex::new(None),
        })
    }

    // Producer side

    /// Delivers one entry. `false` means the consumer stopped the scan.
    #[must_use]
    pub fn send_entry(&self, entry: IndexEntry) -> bool {
        self.entries.send(entry)
    }

    /// Ends the stream normally.
    pub fn close(&self) {
        self.entries.close();
    }

    /// Ends the stream because the scan ran out of time.
    pub fn send_timeout(&self) {
        self.timed_out.store(true, Ordering::Release);
        self.entries.close();
    }

    /// Ends the stream with an error.
    pub fn send_error(&self, err: DatastoreError) {
        *self.error.lock() = Some(err);
        self.entries.close();
    }

    /// Ends the stream because the index panicked. The payload is kept for
    /// the consumer to report.
    pub fn send_panic(&self, payload: Box<dyn Any + Send>) {
        *self.panic.lock() = Some(payload);
        self.entries.close();
    }

    /// Whether the consumer has stopped the scan.
    pub fn is_stopped(&self) -> bool {
        self.entries.is_stopped()
    }

    // Consumer side

    /// Next entry, or `None` at end of stream or after stop.
    pub fn receive(&self) -> Option<IndexEntry> {
        self.entries.receive()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub fn take_error(&self) -> Option<DatastoreError> {
        self.error.lock().take()
    }

    pub fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.lock().take()
    }

    /// Stops the scan early.
    pub fn stop(&self) {
        self.entries.stop();
    }
}

impl Stoppable for IndexConnection {
    fn stop(&self) {
        IndexConnection::stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_stream_then_close() {
        let conn = IndexConnection::new(2);
        let producer = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for i in 0..5 {
                    if !conn.send_entry(IndexEntry::new(vec![json!(i)], format!("k{i}"))) {
                        return;
                    }
                }
                conn.close();
            })
        };
        let mut keys = Vec::new();
        while let Some(entry) = conn.receive() {
            keys.push(entry.primary_key);
        }
        producer.join().unwrap();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
        assert!(!conn.timed_out());
    }

    #[test]
    fn test_timeout_and_error_signals() {
        let conn = IndexConnection::new(2);
        conn.send_timeout();
        assert!(conn.receive().is_none());
        assert!(conn.timed_out());

        let conn = IndexConnection::new(2);
        conn.send_error(DatastoreError::scan_failed("ix", "boom"));
        assert!(conn.receive().is_none());
        assert!(conn.take_error().is_some());
        assert!(conn.take_error().is_none());
    }

    #[test]
    fn test_panic_signal_ends_stream() {
        let conn = IndexConnection::new(2);
        assert!(conn.send_entry(IndexEntry::new(vec![], "k")));
        conn.send_panic(Box::new("boom"));
        assert!(conn.receive().is_some());
        assert!(conn.receive().is_none());
        let payload = conn.take_panic();
        assert_eq!(payload.and_then(|p| p.downcast_ref::<&str>().copied()), Some("boom"));
        assert!(conn.take_panic().is_none());
    }

    #[test]
    fn test_stop_refuses_entries() {
        let conn = IndexConnection::new(2);
        conn.stop();
        assert!(conn.is_stopped());
        assert!(!conn.send_entry(IndexEntry::new(vec![], "k")));
    }
}
