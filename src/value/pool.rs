//! Request-scoped free list of batch buffers
//!
//! Operators that accumulate documents before a blocking storage call check a
//! buffer out of the pool and hand it back when they are done. Buffers are
//! bucketed by power-of-two capacity so a returned buffer is only reused for a
//! request of the same size class. Pooling never affects results.

use parking_lot::Mutex;

use super::AnnotatedValue;

/// Buffers kept per size class.
const MAX_POOLED_PER_CLASS: usize = 32;

/// Number of size classes (capacities 1, 2, 4, ... 2^(CLASSES-1)).
const CLASSES: usize = 16;

/// Free list of `Vec<AnnotatedValue>` buffers.
#[derive(Debug)]
pub struct BatchPool {
    classes: Vec<Mutex<Vec<Vec<AnnotatedValue>>>>,
}

impl Default for BatchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchPool {
    pub fn new() -> Self {
        Self {
            classes: (0..CLASSES).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn class_of(capacity: usize) -> usize {
        let rounded = capacity.max(1).next_power_of_two();
        (rounded.trailing_zeros() as usize).min(CLASSES - 1)
    }

    /// Returns an empty buffer able to hold at least `capacity` items.
    pub fn checkout(&self, capacity: usize) -> Vec<AnnotatedValue> {
        let class = Self::class_of(capacity);
        if let Some(buf) = self.classes[class].lock().pop() {
            if buf.capacity() >= capacity {
                return buf;
            }
        }
        Vec::with_capacity(capacity.max(1).next_power_of_two())
    }

    /// Returns a buffer to the pool. Remaining items are released.
    pub fn give_back(&self, mut buf: Vec<AnnotatedValue>) {
        buf.clear();
        if buf.capacity() == 0 {
            return;
        }
        // file under the largest class the buffer fully satisfies
        let class = (usize::BITS - 1 - buf.capacity().leading_zeros()) as usize;
        let class = class.min(CLASSES - 1);
        let mut slot = self.classes[class].lock();
        if slot.len() < MAX_POOLED_PER_CLASS {
            slot.push(buf);
        }
    }

    /// Number of pooled buffers across all classes.
    pub fn pooled(&self) -> usize {
        self.classes.iter().map(|c| c.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_has_capacity() {
        let pool = BatchPool::new();
        let buf = pool.checkout(10);
        assert!(buf.capacity() >= 10);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_returned_buffer_is_reused() {
        let pool = BatchPool::new();
        let mut buf = pool.checkout(16);
        buf.push(AnnotatedValue::empty_object());
        pool.give_back(buf);
        assert_eq!(pool.pooled(), 1);

        let again = pool.checkout(16);
        assert!(again.is_empty());
        assert!(again.capacity() >= 16);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BatchPool::new();
        for _ in 0..(MAX_POOLED_PER_CLASS + 5) {
            pool.give_back(Vec::with_capacity(4));
        }
        assert_eq!(pool.pooled(), MAX_POOLED_PER_CLASS);
    }
}
