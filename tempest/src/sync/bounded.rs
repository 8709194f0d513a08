//! Bounded FIFO with drop-oldest overflow and timed pops.
//!
//! Multiple producers (one scavenger per data transport) push without ever
//! blocking: a push onto a full queue evicts the oldest element. A single
//! foreground consumer pops with a timeout. No lock is held while the
//! consumer sleeps; the condvar wait releases it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::time::{Deadline, Timeout};

/// A bounded multi-producer FIFO that evicts the oldest element when full.
pub struct BoundedFifo<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    nonempty: Condvar,
}

impl<T> BoundedFifo<T> {
    /// Creates a FIFO holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FIFO capacity must be > 0");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            nonempty: Condvar::new(),
        }
    }

    /// Pushes an element, evicting and returning the oldest one when full.
    ///
    /// Never blocks.
    pub fn push_with_pop_on_full(&self, item: T) -> Option<T> {
        let evicted;
        {
            let mut queue = self.queue.lock().expect("fifo poisoned");
            evicted = if queue.len() == self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(item);
        }
        self.nonempty.notify_one();
        evicted
    }

    /// Pops the oldest element, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the deadline expires with the queue still empty.
    pub fn pop_timed(&self, timeout: Timeout) -> Option<T> {
        let deadline = Deadline::new(timeout);
        let mut queue = self.queue.lock().expect("fifo poisoned");
        loop {
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
            let remaining = deadline.remaining()?;
            // Duration::MAX overflows the condvar deadline arithmetic on
            // some platforms; clamp the infinite case to something long.
            let wait = remaining.min(Duration::from_secs(3600));
            let (guard, result) = self
                .nonempty
                .wait_timeout(queue, wait)
                .expect("fifo poisoned");
            queue = guard;
            if result.timed_out() && deadline.expired() && queue.is_empty() {
                return None;
            }
        }
    }

    /// Number of queued elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().expect("fifo poisoned").len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
