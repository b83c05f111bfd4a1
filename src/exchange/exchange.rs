//! Bounded queue with a child-notification side-channel

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use super::stop::Stoppable;
use crate::value::AnnotatedValue;

/// The exchange type operators use between each other.
pub type ValueExchange = Exchange<AnnotatedValue>;

/// Outcome of a receive that also listens to the child side-channel.
#[derive(Debug)]
pub enum Received<T> {
    /// A data item
    Item(T),
    /// A child posted its completion
    Child(usize),
    /// The exchange is closed and fully drained
    Closed,
    /// The exchange was stopped
    Stopped,
}

#[derive(Debug)]
struct ExchangeState<T> {
    items: VecDeque<T>,
    children: VecDeque<usize>,
    closed: bool,
    read_waiters: usize,
    write_waiters: usize,
}

/// Fixed-capacity FIFO shared by a producer side and a consumer side.
#[derive(Debug)]
pub struct Exchange<T> {
    capacity: usize,
    stopped: AtomicBool,
    state: Mutex<ExchangeState<T>>,
    readable: Condvar,
    writable: Condvar,
}

impl<T> Exchange<T> {
    /// Creates an exchange holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            stopped: AtomicBool::new(false),
            state: Mutex::new(ExchangeState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                children: VecDeque::new(),
                closed: false,
                read_waiters: 0,
                write_waiters: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// A capacity-1 exchange for strictly serialized links.
    pub fn serialized() -> Self {
        Self::new(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of senders currently parked on a full buffer.
    pub fn blocked_senders(&self) -> usize {
        self.state.lock().write_waiters
    }

    /// Number of receivers currently parked on an empty buffer.
    pub fn blocked_receivers(&self) -> usize {
        self.state.lock().read_waiters
    }

    /// Appends an item, parking while the buffer is full.
    ///
    /// Returns `false` if the exchange is stopped or closed; the item is dropped.
    #[must_use]
    pub fn send(&self, item: T) -> bool {
        if self.is_stopped() {
            return false;
        }
        let mut state = self.state.lock();
        loop {
            if self.is_stopped() || state.closed {
                return false;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                drop(state);
                self.readable.notify_one();
                return true;
            }
            state.write_waiters += 1;
            self.writable.wait(&mut state);
            state.write_waiters -= 1;
        }
    }

    /// Takes the next item, parking while the buffer is empty.
    ///
    /// Returns `None` when the exchange is stopped, or closed and drained.
    /// Child notifications are left in place.
    pub fn receive(&self) -> Option<T> {
        if self.is_stopped() {
            return None;
        }
        let mut state = self.state.lock();
        loop {
            if self.is_stopped() {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.writable.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state.read_waiters += 1;
            self.readable.wait(&mut state);
            state.read_waiters -= 1;
        }
    }

    /// Takes the next item or child notification, parking while there is neither.
    ///
    /// Buffered items are always returned before child notifications, so a child
    /// that sends its items and then notifies is seen to have finished only after
    /// all of its items were received.
    pub fn receive_or_child(&self) -> Received<T> {
        if self.is_stopped() {
            return Received::Stopped;
        }
        let mut state = self.state.lock();
        loop {
            if self.is_stopped() {
                return Received::Stopped;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.writable.notify_one();
                return Received::Item(item);
            }
            if let Some(child) = state.children.pop_front() {
                return Received::Child(child);
            }
            if state.closed {
                return Received::Closed;
            }
            state.read_waiters += 1;
            self.readable.wait(&mut state);
            state.read_waiters -= 1;
        }
    }

    /// Waits for the next child notification, discarding any data items.
    ///
    /// Used by operators that only coordinate children whose data flows elsewhere.
    pub fn receive_child(&self) -> Option<usize> {
        loop {
            match self.receive_or_child() {
                Received::Child(child) => return Some(child),
                Received::Item(_) => continue,
                Received::Closed | Received::Stopped => return None,
            }
        }
    }

    /// Posts a child-completion notification. Never blocks.
    ///
    /// Returns `false` if the exchange is stopped.
    pub fn notify_child(&self, child: usize) -> bool {
        if self.is_stopped() {
            return false;
        }
        let mut state = self.state.lock();
        state.children.push_back(child);
        drop(state);
        self.readable.notify_all();
        true
    }

    /// Marks the end of the stream. Buffered items remain receivable.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Sets the stop flag and wakes every waiter.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // take the lock so a waiter between its flag check and its park sees the wakeup
        let state = self.state.lock();
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Restores factory defaults, keeping the allocated buffer.
    ///
    /// Must only be called while no operator is using the exchange.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.children.clear();
        state.closed = false;
        self.stopped.store(false, Ordering::Release);
    }

    /// Drains everything and releases the buffer's backing storage.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.items.shrink_to_fit();
        state.children.clear();
        state.children.shrink_to_fit();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

impl<T: Send> Stoppable for Exchange<T> {
    fn stop(&self) {
        Exchange::stop(self);
    }
}
