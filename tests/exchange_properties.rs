//! Exchange Invariant Tests
//!
//! Tests for the exchange contract:
//! - FIFO order for one producer and one consumer
//! - Never more than `capacity` items buffered
//! - Stop dominates buffered content, blocked calls and later calls
//! - Child notifications arrive after buffered items

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aerodb_exec::exchange::{Exchange, Received};
use proptest::prelude::*;

// =============================================================================
// FIFO and Capacity
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Items arrive in send order across threads.
    #[test]
    fn prop_fifo_across_threads(items in proptest::collection::vec(any::<u32>(), 0..200), capacity in 1usize..8) {
        let exchange: Arc<Exchange<u32>> = Arc::new(Exchange::new(capacity));
        let producer = {
            let exchange = exchange.clone();
            let items = items.clone();
            thread::spawn(move || {
                for item in items {
                    assert!(exchange.send(item));
                }
                exchange.close();
            })
        };
        let mut received = Vec::new();
        while let Some(item) = exchange.receive() {
            prop_assert!(exchange.len() <= capacity);
            received.push(item);
        }
        producer.join().unwrap();
        prop_assert_eq!(received, items);
    }

    /// A single-threaded burst never exceeds capacity and drains after close.
    #[test]
    fn prop_capacity_bound(capacity in 1usize..16, extra in 0usize..4) {
        let exchange: Exchange<usize> = Exchange::new(capacity);
        for i in 0..capacity {
            prop_assert!(exchange.send(i));
        }
        prop_assert_eq!(exchange.len(), capacity);
        exchange.close();
        let drained: Vec<usize> = std::iter::from_fn(|| exchange.receive()).collect();
        prop_assert_eq!(drained, (0..capacity).collect::<Vec<_>>());
        for _ in 0..extra {
            prop_assert!(exchange.receive().is_none());
        }
    }
}

/// A producer blocks exactly when the exchange is full.
#[test]
fn test_producer_blocks_when_full() {
    let exchange: Arc<Exchange<u8>> = Arc::new(Exchange::new(2));
    assert!(exchange.send(1));
    assert!(exchange.send(2));
    let producer = {
        let exchange = exchange.clone();
        thread::spawn(move || exchange.send(3))
    };
    while exchange.blocked_senders() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(exchange.len(), 2);
    assert_eq!(exchange.receive(), Some(1));
    assert!(producer.join().unwrap());
    assert_eq!(exchange.receive(), Some(2));
    assert_eq!(exchange.receive(), Some(3));
}

// =============================================================================
// Stop Dominance
// =============================================================================

/// Stop fails buffered, blocked and later operations.
#[test]
fn test_stop_dominates() {
    let exchange: Arc<Exchange<u8>> = Arc::new(Exchange::new(1));
    assert!(exchange.send(1));
    let blocked = {
        let exchange = exchange.clone();
        thread::spawn(move || exchange.send(2))
    };
    while exchange.blocked_senders() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    exchange.stop();
    assert!(!blocked.join().unwrap());
    assert!(exchange.receive().is_none());
    assert!(!exchange.send(3));
    assert!(matches!(exchange.receive_or_child(), Received::Stopped));
}

/// A consumer blocked on an empty exchange wakes on stop.
#[test]
fn test_stop_wakes_blocked_receiver() {
    let exchange: Arc<Exchange<u8>> = Arc::new(Exchange::new(4));
    let consumer = {
        let exchange = exchange.clone();
        thread::spawn(move || exchange.receive())
    };
    while exchange.blocked_receivers() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    exchange.stop();
    assert!(consumer.join().unwrap().is_none());
}

// =============================================================================
// Child Side-Channel
// =============================================================================

/// Buffered items come before child completions; close ends the stream.
#[test]
fn test_child_notifications_after_items() {
    let exchange: Exchange<&str> = Exchange::new(4);
    assert!(exchange.send("row"));
    assert!(exchange.notify_child(3));
    assert!(matches!(exchange.receive_or_child(), Received::Item("row")));
    assert!(matches!(exchange.receive_or_child(), Received::Child(3)));
    exchange.close();
    assert!(matches!(exchange.receive_or_child(), Received::Closed));
}

/// Reset restores a stopped exchange for reuse.
#[test]
fn test_reset_after_stop() {
    let exchange: Exchange<u8> = Exchange::new(2);
    exchange.stop();
    exchange.reset();
    assert!(!exchange.is_stopped());
    assert!(exchange.send(7));
    assert_eq!(exchange.receive(), Some(7));
}
