//! Receive scavenger workers.
//!
//! One scavenger thread runs per data transport. It drains inbound frames
//! and classifies each one: TX async status reports (the reserved async
//! stream id with a non-data packet type) go to the async FIFO; data
//! packets have their sequence counter checked and are pushed into the
//! alignment buffer with their decoded time. Ownership of every frame
//! transfers onward or is dropped (released) before the next iteration.
//!
//! The loop runs until the shared run flag clears. A data packet missing
//! either timestamp violates the device contract and is fatal to the
//! worker only; the foreground then drains to timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::stream::metadata::AsyncMetadata;
use crate::stream::{OverflowHook, emit_indicator};
use crate::sync::BoundedFifo;
use crate::time::{TimeSpec, Timeout};
use crate::trace::{debug, error, info, warn};
use crate::transport::FrameTransport;
use crate::vrt::{self, PacketType, hdr_unpack_be};

use super::alignment::AlignmentBuffer;

/// How long one transport acquire may block before the run flag is
/// rechecked.
const ACQUIRE_SLICE: Duration = Duration::from_millis(100);

/// Everything one scavenger thread needs.
pub(crate) struct ScavengerCtx {
    pub transport: Arc<dyn FrameTransport>,
    /// This worker's data-transport index; doubles as the channel index on
    /// async reports and alignment pushes.
    pub index: usize,
    /// Master clock rate used to interpret fractional timestamps.
    pub tick_rate: f64,
    pub alignment: Arc<AlignmentBuffer>,
    pub async_fifo: Arc<BoundedFifo<AsyncMetadata>>,
    pub running: Arc<AtomicBool>,
    pub overflow_hook: Option<OverflowHook>,
}

/// Runs the scavenger loop to completion.
pub(crate) fn run(ctx: &ScavengerCtx) {
    info!(index = ctx.index, "scavenger started");
    let mut expected_seq: u8 = 0;
    let mut malformed: u64 = 0;

    while ctx.running.load(Ordering::Acquire) {
        let Some(frame) = ctx
            .transport
            .acquire_recv_frame(Timeout::Duration(ACQUIRE_SLICE))
        else {
            continue; // deadline or transient error; no sentinel downstream
        };

        let info = match hdr_unpack_be(&frame) {
            Ok(info) => info,
            Err(_e) => {
                malformed += 1;
                warn!(index = ctx.index, malformed, error = %_e, "dropping malformed frame");
                continue; // frame releases on drop
            }
        };

        // TX async status report: reserved stream id, non-data type.
        if info.stream_id == vrt::ASYNC_SID && info.packet_type != PacketType::Data {
            let event_code = vrt::context_event_code(&frame, &info);
            if event_code.is_underflow() {
                emit_indicator('U');
                debug!(index = ctx.index, "underflow reported by device");
            }
            let time_spec = (info.has_tsi && info.has_tsf)
                .then(|| TimeSpec::from_packet(info.tsi, info.tsf, ctx.tick_rate));
            ctx.async_fifo.push_with_pop_on_full(AsyncMetadata {
                channel: ctx.index,
                event_code,
                time_spec,
            });
            continue; // frame releases on drop
        }

        // Sequence check: a gap means the kernel dropped datagrams.
        if info.packet_count != expected_seq {
            emit_indicator('O');
            debug!(
                index = ctx.index,
                got = info.packet_count,
                expected = expected_seq,
                severity = (16 + info.packet_count - expected_seq) % 16,
                "sequence gap"
            );
            if let Some(hook) = &ctx.overflow_hook {
                hook(ctx.index);
            }
        }
        expected_seq = (info.packet_count + 1) % 16;

        // The device stamps every data packet with both timestamp fields.
        if !(info.has_tsi && info.has_tsf) {
            error!(
                index = ctx.index,
                "data packet without full timestamp, stopping worker"
            );
            return; // frame releases on drop
        }
        let time = TimeSpec::from_packet(info.tsi, info.tsf, ctx.tick_rate);

        // Ownership of the frame transfers to the alignment buffer.
        ctx.alignment.push(frame, time, ctx.index);
    }
    info!(index = ctx.index, malformed, "scavenger stopped");
}
