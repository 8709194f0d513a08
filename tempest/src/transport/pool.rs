//! Fixed-size buffer pools.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::time::{Deadline, Timeout};

/// A pool of `num_frames` equally sized byte buffers.
///
/// Acquire blocks (with deadline) until a buffer is free; release never
/// blocks. All buffers are allocated up front so the steady-state hot path
/// never touches the allocator.
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    returned: Condvar,
    num_frames: usize,
    frame_size: usize,
}

impl BufferPool {
    /// Allocates a pool of `num_frames` buffers of `frame_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[must_use]
    pub fn new(num_frames: usize, frame_size: usize) -> Arc<Self> {
        assert!(num_frames > 0, "pool must hold at least one frame");
        assert!(frame_size > 0, "frames must be non-empty");
        let free = (0..num_frames)
            .map(|_| vec![0u8; frame_size].into_boxed_slice())
            .collect();
        Arc::new(Self {
            free: Mutex::new(free),
            returned: Condvar::new(),
            num_frames,
            frame_size,
        })
    }

    /// Takes a free buffer, waiting up to `timeout` for one.
    pub fn acquire(&self, timeout: Timeout) -> Option<Box<[u8]>> {
        let deadline = Deadline::new(timeout);
        let mut free = self.free.lock().expect("pool poisoned");
        loop {
            if let Some(buf) = free.pop() {
                return Some(buf);
            }
            let remaining = deadline.remaining()?;
            let wait = remaining.min(Duration::from_secs(3600));
            let (guard, result) = self
                .returned
                .wait_timeout(free, wait)
                .expect("pool poisoned");
            free = guard;
            if result.timed_out() && deadline.expired() && free.is_empty() {
                return None;
            }
        }
    }

    /// Returns a buffer to the pool.
    pub fn release(&self, buf: Box<[u8]>) {
        debug_assert_eq!(buf.len(), self.frame_size);
        self.free.lock().expect("pool poisoned").push(buf);
        self.returned.notify_one();
    }

    /// Number of buffers currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().expect("pool poisoned").len()
    }

    /// Total number of buffers owned by the pool.
    #[must_use]
    pub const fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Size of each buffer in bytes.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_until_exhausted() {
        let pool = BufferPool::new(2, 128);
        let a = pool.acquire(Timeout::Duration(Duration::ZERO)).unwrap();
        let b = pool.acquire(Timeout::Duration(Duration::ZERO)).unwrap();
        assert_eq!(a.len(), 128);
        assert!(pool.acquire(Timeout::Duration(Duration::ZERO)).is_none());

        pool.release(b);
        assert!(pool.acquire(Timeout::Duration(Duration::ZERO)).is_some());
    }

    #[test]
    fn acquire_wakes_on_release() {
        let pool = BufferPool::new(1, 16);
        let held = pool.acquire(Timeout::Infinite).unwrap();

        let pool2 = Arc::clone(&pool);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            pool2.release(held);
        });

        let got = pool.acquire(Timeout::Duration(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(got.is_some());
    }
}
