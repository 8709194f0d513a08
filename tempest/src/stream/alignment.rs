//! Multi-stream receive alignment buffer.
//!
//! W producer streams (one per data transport) push timestamped frames;
//! one consumer pops tuples of exactly W frames whose time specs are all
//! equal. The aligner is the standard max-timestamp dropper: whenever all
//! heads exist but disagree, every head strictly older than the newest
//! head is dropped, releasing its frame. That guarantees forward progress
//! and at most one alignment per time value.
//!
//! Each stream's FIFO is bounded; a push onto a full stream evicts that
//! stream's oldest frame. With depth `D ≥ num_recv_frames − 3` the
//! transport pool always keeps at least three frames free to refill, so
//! producer and consumer cannot deadlock on buffer exhaustion.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::time::{Deadline, TimeSpec, Timeout};
use crate::trace::trace;
use crate::transport::RecvFrame;

struct Slot {
    frame: RecvFrame,
    time: TimeSpec,
}

struct Streams {
    queues: Vec<VecDeque<Slot>>,
}

/// A bounded, multi-stream ring delivering time-aligned frame tuples.
pub struct AlignmentBuffer {
    streams: Mutex<Streams>,
    pushed: Condvar,
    depth: usize,
}

impl AlignmentBuffer {
    /// Creates a buffer for `width` streams of `depth` frames each.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[must_use]
    pub fn new(width: usize, depth: usize) -> Self {
        assert!(width > 0, "alignment buffer needs at least one stream");
        assert!(depth > 0, "alignment buffer needs at least one slot");
        Self {
            streams: Mutex::new(Streams {
                queues: (0..width).map(|_| VecDeque::with_capacity(depth)).collect(),
            }),
            pushed: Condvar::new(),
            depth,
        }
    }

    /// Number of producer streams.
    #[must_use]
    pub fn width(&self) -> usize {
        self.streams.lock().expect("alignment poisoned").queues.len()
    }

    /// Enqueues a frame on stream `index`, evicting that stream's oldest
    /// frame when full. Never blocks.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn push(&self, frame: RecvFrame, time: TimeSpec, index: usize) {
        {
            let mut streams = self.streams.lock().expect("alignment poisoned");
            let queue = &mut streams.queues[index];
            if queue.len() == self.depth {
                // Eviction releases the frame through its drop.
                let stale = queue.pop_front();
                drop(stale);
                trace!(stream = index, "alignment stream full, dropped oldest");
            }
            queue.push_back(Slot { frame, time });
        }
        self.pushed.notify_one();
    }

    /// Pops one aligned tuple: a frame per stream, all with equal times.
    ///
    /// Returns `None` when the deadline expires before alignment is
    /// reached. Frames dropped by the aligner are released immediately.
    pub fn pop_aligned(&self, timeout: Timeout) -> Option<Vec<RecvFrame>> {
        let deadline = Deadline::new(timeout);
        let mut streams = self.streams.lock().expect("alignment poisoned");
        loop {
            match try_align(&mut streams) {
                Aligned::Ready(frames) => return Some(frames),
                Aligned::Dropped => continue, // progress was made, retry now
                Aligned::NeedData => {}
            }
            let remaining = deadline.remaining()?;
            let wait = remaining.min(Duration::from_secs(3600));
            let (guard, result) = self
                .pushed
                .wait_timeout(streams, wait)
                .expect("alignment poisoned");
            streams = guard;
            if result.timed_out() && deadline.expired() {
                // One last look: the push may have landed with the timeout.
                if let Aligned::Ready(frames) = try_align(&mut streams) {
                    return Some(frames);
                }
                return None;
            }
        }
    }

    /// True if every stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let streams = self.streams.lock().expect("alignment poisoned");
        streams.queues.iter().all(VecDeque::is_empty)
    }
}

enum Aligned {
    /// All heads agreed; the tuple was consumed.
    Ready(Vec<RecvFrame>),
    /// Stale heads were dropped; alignment may now be possible.
    Dropped,
    /// At least one stream is empty.
    NeedData,
}

fn try_align(streams: &mut Streams) -> Aligned {
    let mut head_max: Option<TimeSpec> = None;
    for queue in &streams.queues {
        match queue.front() {
            None => return Aligned::NeedData,
            Some(slot) => {
                head_max = Some(head_max.map_or(slot.time, |t| t.max(slot.time)));
            }
        }
    }
    let t_max = head_max.expect("at least one stream");

    if streams
        .queues
        .iter()
        .all(|q| q.front().is_some_and(|s| s.time == t_max))
    {
        let frames = streams
            .queues
            .iter_mut()
            .map(|q| q.pop_front().expect("head checked above").frame)
            .collect();
        return Aligned::Ready(frames);
    }

    // Drop every head strictly older than the newest head.
    for queue in &mut streams.queues {
        if queue.front().is_some_and(|s| s.time < t_max) {
            drop(queue.pop_front());
        }
    }
    Aligned::Dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BufferPool;
    use std::sync::Arc;

    fn pool(frames: usize) -> Arc<BufferPool> {
        BufferPool::new(frames, 64)
    }

    fn frame(pool: &Arc<BufferPool>) -> RecvFrame {
        let buf = pool.acquire(Timeout::Infinite).expect("pool dry");
        RecvFrame::new(buf, 16, Arc::clone(pool))
    }

    fn at(secs: i64) -> TimeSpec {
        TimeSpec::new(secs, 0, 100e6)
    }

    const POP_NOW: Timeout = Timeout::Duration(Duration::ZERO);

    #[test]
    fn aligns_when_all_heads_agree() {
        let pool = pool(4);
        let buffer = AlignmentBuffer::new(2, 4);
        buffer.push(frame(&pool), at(10), 0);
        buffer.push(frame(&pool), at(10), 1);

        let tuple = buffer.pop_aligned(POP_NOW).expect("aligned");
        assert_eq!(tuple.len(), 2);
        drop(tuple);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn drops_stale_heads_until_alignment() {
        // Stream 0 carries {10, 11, 12}; stream 1 carries {11, 12}.
        // The tuple at 10 cannot form: its stream-0 frame is dropped, then
        // tuples at 11 and 12 pop cleanly.
        let pool = pool(8);
        let buffer = AlignmentBuffer::new(2, 4);
        for secs in [10, 11, 12] {
            buffer.push(frame(&pool), at(secs), 0);
        }
        for secs in [11, 12] {
            buffer.push(frame(&pool), at(secs), 1);
        }
        assert_eq!(pool.available(), 3);

        let first = buffer.pop_aligned(POP_NOW).expect("tuple at 11");
        assert_eq!(first.len(), 2);
        // The dropped frame@10 plus nothing else was released so far.
        assert_eq!(pool.available(), 4);
        drop(first);

        let second = buffer.pop_aligned(POP_NOW).expect("tuple at 12");
        drop(second);

        assert!(buffer.pop_aligned(POP_NOW).is_none());
        assert!(buffer.is_empty());
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn empty_stream_blocks_until_timeout() {
        let pool = pool(4);
        let buffer = AlignmentBuffer::new(2, 4);
        buffer.push(frame(&pool), at(5), 0);

        let start = std::time::Instant::now();
        assert!(
            buffer
                .pop_aligned(Timeout::Duration(Duration::from_millis(25)))
                .is_none()
        );
        assert!(start.elapsed() >= Duration::from_millis(25));
        // The waiting frame stays queued for the next call.
        assert!(!buffer.is_empty());
    }

    #[test]
    fn push_evicts_oldest_on_full_stream() {
        let pool = pool(4);
        let buffer = AlignmentBuffer::new(1, 2);
        buffer.push(frame(&pool), at(1), 0);
        buffer.push(frame(&pool), at(2), 0);
        assert_eq!(pool.available(), 2);

        // Third push on a depth-2 stream evicts the frame at t=1.
        buffer.push(frame(&pool), at(3), 0);
        assert_eq!(pool.available(), 2);

        let tuple = buffer.pop_aligned(POP_NOW).expect("head");
        drop(tuple);
        let tuple = buffer.pop_aligned(POP_NOW).expect("second");
        drop(tuple);
        assert!(buffer.is_empty());
    }

    #[test]
    fn wakes_blocked_consumer_when_last_stream_fills() {
        let pool = pool(4);
        let buffer = Arc::new(AlignmentBuffer::new(2, 4));
        buffer.push(frame(&pool), at(7), 0);

        let producer = Arc::clone(&buffer);
        let producer_pool = Arc::clone(&pool);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(frame(&producer_pool), at(7), 1);
        });

        let tuple = buffer.pop_aligned(Timeout::Duration(Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(tuple.expect("aligned after push").len(), 2);
    }

    #[test]
    fn ticks_participate_in_alignment() {
        // Same integer second, different tick counts: not aligned.
        let pool = pool(4);
        let buffer = AlignmentBuffer::new(2, 4);
        buffer.push(frame(&pool), TimeSpec::new(3, 100, 100e6), 0);
        buffer.push(frame(&pool), TimeSpec::new(3, 200, 100e6), 1);

        assert!(buffer.pop_aligned(POP_NOW).is_none());
        // The older head (fewer ticks) was dropped by the aligner.
        assert_eq!(pool.available(), 3);
    }
}
