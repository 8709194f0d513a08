//! The streaming I/O pipeline.
//!
//! # Receive side
//!
//! One scavenger thread per data transport drains inbound frames,
//! routes TX async status reports to a bounded FIFO, and pushes data
//! frames (with their decoded timestamps) into the alignment buffer.
//! The foreground [`StreamIo::recv`] pops time-aligned frame tuples and
//! converts payload words into user buffers, resuming mid-packet across
//! calls.
//!
//! # Transmit side
//!
//! [`StreamIo::send`] fragments user samples into IF packets with correct
//! burst flags and a per-channel modulo-16 counter, and commits one frame
//! per data transport per fragment.
//!
//! The alignment buffer and the async FIFO are the only shared mutable
//! objects; both are bounded and drop the oldest element when full.

pub mod alignment;
pub mod metadata;
pub mod recv;
pub mod scavenger;
pub mod send;

mod io;

pub use alignment::AlignmentBuffer;
pub use io::{StreamIo, StreamIoOptions};
pub use metadata::{AsyncMetadata, RxErrorCode, RxMetadata, TxMetadata};
pub use recv::RecvMode;
pub use send::{SendError, SendMode};

use crate::convert::OTW_BYTES_PER_SAMPLE;
use crate::vrt::MAX_IF_HDR_WORDS32;

/// Callback invoked with a channel index when a sequence gap is detected.
pub type OverflowHook = std::sync::Arc<dyn Fn(usize) + Send + Sync>;

/// Class id bytes: reserved in the header budget but never on our wire.
const CID_BYTES: usize = 8;
/// Trailer word bytes, mandatory on receive.
const TRAILER_BYTES: usize = 4;

/// Largest sample count in one receive packet for a given frame size.
#[must_use]
pub fn max_recv_samps_per_packet(recv_frame_size: usize) -> usize {
    let overhead = MAX_IF_HDR_WORDS32 * 4 + TRAILER_BYTES - CID_BYTES;
    (recv_frame_size - overhead) / OTW_BYTES_PER_SAMPLE
}

/// Largest sample count in one transmit packet for a given frame size.
#[must_use]
pub fn max_send_samps_per_packet(send_frame_size: usize) -> usize {
    let overhead = MAX_IF_HDR_WORDS32 * 4 - CID_BYTES;
    (send_frame_size - overhead) / OTW_BYTES_PER_SAMPLE
}

/// Writes a single-character wire-health indicator straight to stderr.
///
/// `O` flags a receive overflow (kernel drops), `U` a transmit underflow.
/// Stderr is unbuffered, so the character lands immediately even inside a
/// worker thread.
pub(crate) fn emit_indicator(c: char) {
    use std::io::Write;
    let _ = write!(std::io::stderr(), "{c}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_budgets_for_standard_frames() {
        // 7 header words * 4 + 4 trailer - 8 cid = 24 bytes of recv overhead.
        assert_eq!(max_recv_samps_per_packet(1472), (1472 - 24) / 4);
        // Send side never carries the trailer.
        assert_eq!(max_send_samps_per_packet(1472), (1472 - 20) / 4);
    }
}
