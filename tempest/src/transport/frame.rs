//! Frame handles.
//!
//! A frame handle is the unit of buffer ownership in the pipeline: at any
//! moment a buffer is owned by exactly one of the transport pool, a
//! scavenger, an alignment-buffer slot, the recv cursor, or a user-visible
//! handle. Release happens in `Drop`, so no exit path (including panic
//! unwind) can leak a buffer or release it twice.

use std::io;
use std::ops::Deref;
use std::sync::Arc;

use super::pool::BufferPool;

/// Commits outbound frames to the wire and recycles their buffers.
///
/// Implemented by each transport; [`SendFrame`] carries one so that commit
/// and recycle reach the right socket and pool without a back-pointer to
/// the whole transport.
pub trait FrameSink: Send + Sync {
    /// Transmits `bytes` as one datagram.
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram cannot be sent.
    fn commit(&self, bytes: &[u8]) -> io::Result<()>;

    /// Returns an outbound buffer to its pool.
    fn recycle(&self, buf: Box<[u8]>);
}

/// An inbound frame: one received datagram in a pooled buffer.
///
/// Dereferences to the datagram bytes. Dropping the handle returns the
/// buffer to its pool.
pub struct RecvFrame {
    buf: Option<Box<[u8]>>,
    len: usize,
    pool: Arc<BufferPool>,
}

impl RecvFrame {
    /// Wraps a pool buffer holding `len` received bytes.
    #[must_use]
    pub fn new(buf: Box<[u8]>, len: usize, pool: Arc<BufferPool>) -> Self {
        Self {
            buf: Some(buf),
            len,
            pool,
        }
    }

    /// Received datagram length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length datagram.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for RecvFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Invariant: `buf` is Some until Drop takes it.
        &self.buf.as_ref().expect("buffer present until drop")[..self.len]
    }
}

impl Drop for RecvFrame {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl std::fmt::Debug for RecvFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvFrame").field("len", &self.len).finish()
    }
}

/// An outbound frame: a writable pooled buffer bound to its transport.
///
/// Filled in place, then either committed (transmit + recycle) or dropped
/// (recycle only).
pub struct SendFrame {
    buf: Option<Box<[u8]>>,
    sink: Arc<dyn FrameSink>,
}

impl SendFrame {
    /// Wraps a writable pool buffer bound to `sink`.
    #[must_use]
    pub fn new(buf: Box<[u8]>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            buf: Some(buf),
            sink,
        }
    }

    /// Writable frame capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().expect("buffer present until drop").len()
    }

    /// The writable buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("buffer present until drop")
    }

    /// Transmits the first `len` bytes and recycles the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot send; the buffer is
    /// recycled either way.
    pub fn commit(mut self, len: usize) -> io::Result<()> {
        let buf = self.buf.take().expect("buffer present until drop");
        let result = self.sink.commit(&buf[..len]);
        self.sink.recycle(buf);
        result
    }
}

impl Drop for SendFrame {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.sink.recycle(buf);
        }
    }
}
