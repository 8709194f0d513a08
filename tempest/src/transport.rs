//! Zero-copy frame transports.
//!
//! A transport is a bidirectional frame channel to one device UDP endpoint.
//! Frames are fixed-size buffers drawn from per-direction pools; a frame
//! handle owns its buffer exclusively while outstanding and returns it to
//! the pool when dropped, on every exit path. The streaming core is written
//! against the [`FrameTransport`] trait so tests (and future kernel-bypass
//! backends) can inject their own.

pub mod frame;
pub mod pool;
pub mod udp;

pub use frame::{FrameSink, RecvFrame, SendFrame};
pub use pool::BufferPool;
pub use udp::UdpTransport;

use crate::time::Timeout;

/// A bidirectional frame channel with timed acquire operations.
///
/// `acquire_recv_frame` yields the next inbound datagram wrapped in a
/// pooled buffer, or `None` on deadline; transient I/O errors are logged by
/// the implementation and surface as `None` as well. `acquire_send_frame`
/// yields a writable frame whose [`SendFrame::commit`] transmits it.
pub trait FrameTransport: Send + Sync {
    /// Waits up to `timeout` for an inbound frame.
    fn acquire_recv_frame(&self, timeout: Timeout) -> Option<RecvFrame>;

    /// Waits up to `timeout` for a free outbound frame.
    fn acquire_send_frame(&self, timeout: Timeout) -> Option<SendFrame>;

    /// Size of the receive frame pool.
    fn num_recv_frames(&self) -> usize;

    /// Receive frame capacity in bytes.
    fn recv_frame_size(&self) -> usize;

    /// Send frame capacity in bytes.
    fn send_frame_size(&self) -> usize;

    /// Unblocks a concurrent `acquire_recv_frame` so its caller can observe
    /// a shutdown flag. Default: no-op for transports that never block.
    fn wake(&self) {}
}
