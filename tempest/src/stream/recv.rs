//! Foreground receive packet handler.
//!
//! Converts aligned frame tuples into user sample buffers. A call may
//! consume part of a packet set; the remainder stays pinned in the cursor
//! and the next call resumes from it, so user chunking is independent of
//! packet boundaries.

use std::sync::Arc;

use crate::convert::{OTW_BYTES_PER_SAMPLE, Sample, otw_to_samples};
use crate::time::{Deadline, TimeSpec, Timeout};
use crate::trace::warn;
use crate::transport::RecvFrame;
use crate::vrt::hdr_unpack_be;

use super::alignment::AlignmentBuffer;
use super::metadata::{RxErrorCode, RxMetadata};

/// How much of the user buffer a single `recv` call fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Return after at most one packet's worth of samples.
    OnePacket,
    /// Keep consuming packets until the buffer is full or time runs out.
    FullBuff,
}

/// An aligned packet set being consumed, with its per-set metadata and the
/// intra-packet cursor.
struct Cursor {
    frames: Vec<RecvFrame>,
    /// Byte offset of each frame's payload.
    payload_at: Vec<usize>,
    /// Samples available in the set (the minimum across frames).
    size: usize,
    consumed: usize,
    metadata: RxMetadata,
}

/// Per-session receive state: one fragment cursor shared by all channels.
pub struct RecvHandler {
    alignment: Arc<AlignmentBuffer>,
    width: usize,
    tick_rate: f64,
    cursor: Option<Cursor>,
}

impl RecvHandler {
    pub(crate) fn new(alignment: Arc<AlignmentBuffer>, width: usize, tick_rate: f64) -> Self {
        Self {
            alignment,
            width,
            tick_rate,
            cursor: None,
        }
    }

    /// Receives up to `num_samps` samples into each of the `width` buffers.
    ///
    /// Returns the sample count written to every buffer. Zero with
    /// `metadata.error == Some(Timeout)` means nothing arrived in time;
    /// zero with no error only ever happens for a zero-length request.
    ///
    /// # Panics
    ///
    /// Panics if `buffs.len()` differs from the stream width or any buffer
    /// is shorter than `num_samps`.
    pub fn recv<T: Sample>(
        &mut self,
        buffs: &mut [&mut [T]],
        num_samps: usize,
        metadata: &mut RxMetadata,
        mode: RecvMode,
        timeout: Timeout,
    ) -> usize {
        assert_eq!(buffs.len(), self.width, "one buffer per channel");
        *metadata = RxMetadata::default();

        let deadline = Deadline::new(timeout);
        let mut accumulated = 0;
        let mut populated = false;

        while accumulated < num_samps {
            if self.cursor.is_none() {
                let remaining = deadline
                    .remaining()
                    .map_or(Timeout::Duration(std::time::Duration::ZERO), |d| {
                        Timeout::Duration(d)
                    });
                match self.alignment.pop_aligned(remaining) {
                    Some(frames) => match self.open_set(frames) {
                        Ok(cursor) => self.cursor = Some(cursor),
                        Err(code) => {
                            // A set the scavenger accepted should never fail
                            // here; report it and surface what we have.
                            if accumulated == 0 {
                                metadata.error = Some(code);
                            }
                            return accumulated;
                        }
                    },
                    None => {
                        if accumulated == 0 {
                            metadata.error = Some(RxErrorCode::Timeout);
                        }
                        return accumulated;
                    }
                }
            }

            let cursor = self.cursor.as_mut().expect("just filled");
            if !populated {
                *metadata = cursor.metadata;
                populated = true;
            }

            let take = (num_samps - accumulated).min(cursor.size - cursor.consumed);
            for (frame, (&payload_at, buff)) in cursor
                .frames
                .iter()
                .zip(cursor.payload_at.iter().zip(buffs.iter_mut()))
            {
                let from = payload_at + cursor.consumed * OTW_BYTES_PER_SAMPLE;
                let to = from + take * OTW_BYTES_PER_SAMPLE;
                otw_to_samples(&frame[from..to], &mut buff[accumulated..accumulated + take]);
            }
            cursor.consumed += take;
            accumulated += take;

            if cursor.consumed == cursor.size {
                self.cursor = None; // frames release here
            }
            if mode == RecvMode::OnePacket {
                break;
            }
        }
        accumulated
    }

    /// Unpacks a fresh aligned set into a cursor.
    fn open_set(&self, frames: Vec<RecvFrame>) -> Result<Cursor, RxErrorCode> {
        let mut payload_at = Vec::with_capacity(frames.len());
        let mut size = usize::MAX;
        let mut metadata = RxMetadata::default();

        for (i, frame) in frames.iter().enumerate() {
            let info = match hdr_unpack_be(frame) {
                Ok(info) => info,
                Err(_e) => {
                    warn!(error = %_e, "aligned frame failed header validation");
                    return Err(RxErrorCode::BadPacket);
                }
            };
            payload_at.push(info.num_header_words32 * 4);
            size = size.min(info.num_payload_words32 * 4 / OTW_BYTES_PER_SAMPLE);

            if i == 0 {
                metadata.has_time_spec = info.has_tsi && info.has_tsf;
                if metadata.has_time_spec {
                    metadata.time_spec =
                        TimeSpec::from_packet(info.tsi, info.tsf, self.tick_rate);
                }
                metadata.start_of_burst = info.sob;
                metadata.end_of_burst = info.eob;
            }
        }

        Ok(Cursor {
            frames,
            payload_at,
            size,
            consumed: 0,
            metadata,
        })
    }
}
