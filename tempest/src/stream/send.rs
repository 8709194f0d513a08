//! Foreground send packet handler.
//!
//! Fragments user samples into IF packets: the first packet of a burst
//! carries the start-of-burst flag and the time spec, the last carries
//! end-of-burst, and every packet increments the channel's modulo-16
//! counter. One frame per data transport is committed per fragment.

use std::sync::Arc;

use thiserror::Error;

use crate::convert::{OTW_BYTES_PER_SAMPLE, Sample, samples_to_otw};
use crate::time::Timeout;
use crate::trace::{debug, warn};
use crate::transport::FrameTransport;
use crate::vrt::{IfPacketInfo, PacketType, hdr_pack_be};

use super::metadata::TxMetadata;

/// How much of the user buffer a single `send` call drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Transmit at most one packet's worth of samples.
    OnePacket,
    /// Fragment and transmit the whole buffer.
    FullBuff,
}

/// Errors from the send path.
#[derive(Debug, Error)]
pub enum SendError {
    /// Not every data transport yielded a frame within the deadline;
    /// zero samples were committed.
    #[error("timed out acquiring send frames")]
    SendTimeout,
    /// A transport failed while committing a packet.
    #[error("transport commit failed: {0}")]
    Commit(#[from] std::io::Error),
}

/// Per-channel transmit state.
struct TxChannel {
    stream_id: u32,
    /// Wire counter, modulo 16.
    packet_count: u8,
    burst_open: bool,
}

/// Per-session send state across all channels.
pub struct SendHandler {
    transports: Vec<Arc<dyn FrameTransport>>,
    channels: Vec<TxChannel>,
    max_samps_per_packet: usize,
}

impl SendHandler {
    pub(crate) fn new(
        transports: Vec<Arc<dyn FrameTransport>>,
        stream_ids: Vec<u32>,
        max_samps_per_packet: usize,
    ) -> Self {
        let channels = stream_ids
            .into_iter()
            .map(|stream_id| TxChannel {
                stream_id,
                packet_count: 0,
                burst_open: false,
            })
            .collect();
        Self {
            transports,
            channels,
            max_samps_per_packet,
        }
    }

    /// Transmits up to `num_samps` samples from each of the channel buffers.
    ///
    /// Returns the sample count committed from every buffer. The first
    /// fragment failing to acquire frames is a [`SendError::SendTimeout`]
    /// with nothing sent; a later fragment timing out ends the call early
    /// with the committed total.
    ///
    /// # Errors
    ///
    /// [`SendError::SendTimeout`] when no frame set could be acquired, or
    /// [`SendError::Commit`] when a transport rejects a packet.
    ///
    /// # Panics
    ///
    /// Panics if `buffs.len()` differs from the channel count or any buffer
    /// is shorter than `num_samps`.
    pub fn send<T: Sample>(
        &mut self,
        buffs: &[&[T]],
        num_samps: usize,
        metadata: &TxMetadata,
        mode: SendMode,
        timeout: Timeout,
    ) -> Result<usize, SendError> {
        assert_eq!(buffs.len(), self.transports.len(), "one buffer per channel");

        let total = match mode {
            SendMode::OnePacket => num_samps.min(self.max_samps_per_packet),
            SendMode::FullBuff => num_samps,
        };
        if metadata.start_of_burst {
            for channel in &mut self.channels {
                channel.burst_open = true;
            }
        } else if self.channels.iter().any(|c| !c.burst_open) {
            // Continuation data outside a burst still flows; the device
            // reports it as a sequence error in its async status.
            debug!("send continuation with no open burst");
        }

        let mut sent = 0;
        while sent < total || (total == 0 && sent == 0) {
            let samps = (total - sent).min(self.max_samps_per_packet);
            let is_first = sent == 0;
            let is_last = sent + samps == total;

            let mut frames = Vec::with_capacity(self.transports.len());
            for transport in &self.transports {
                match transport.acquire_send_frame(timeout) {
                    Some(frame) => frames.push(frame),
                    None if is_first => return Err(SendError::SendTimeout),
                    None => {
                        warn!(sent, "send frame acquire timed out mid-burst");
                        return Ok(sent);
                    }
                }
            }

            for ((channel, buff), mut frame) in
                self.channels.iter_mut().zip(buffs).zip(frames)
            {
                let mut info = IfPacketInfo {
                    packet_type: PacketType::Data,
                    stream_id: channel.stream_id,
                    packet_count: channel.packet_count,
                    num_payload_words32: samps * OTW_BYTES_PER_SAMPLE / 4,
                    sob: metadata.start_of_burst && is_first,
                    eob: metadata.end_of_burst && is_last,
                    has_tsi: metadata.has_time_spec && is_first,
                    has_tsf: metadata.has_time_spec && is_first,
                    tsi: metadata.time_spec.full_secs() as u32,
                    tsf: metadata.time_spec.frac_ticks(),
                    ..IfPacketInfo::default()
                };

                let bytes = frame.as_mut_slice();
                let hdr_words = hdr_pack_be(bytes, &mut info);
                samples_to_otw(
                    &buff[sent..sent + samps],
                    &mut bytes[hdr_words * 4..hdr_words * 4 + samps * OTW_BYTES_PER_SAMPLE],
                );
                frame.commit(info.num_packet_words32 * 4)?;

                channel.packet_count = (channel.packet_count + 1) % 16;
                if info.eob {
                    channel.burst_open = false;
                }
            }
            debug!(samps, is_first, is_last, "committed packet set");

            sent += samps;
            if total == 0 {
                break;
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeSpec;
    use crate::transport::{BufferPool, FrameSink, RecvFrame, SendFrame};
    use crate::vrt::hdr_unpack_be;
    use num_complex::Complex;
    use std::sync::Mutex;

    /// Transport double that records every committed datagram.
    struct WireTap {
        pool: Arc<BufferPool>,
        sink: Arc<CaptureSink>,
    }

    struct CaptureSink {
        pool: Arc<BufferPool>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl FrameSink for CaptureSink {
        fn commit(&self, bytes: &[u8]) -> std::io::Result<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn recycle(&self, buf: Box<[u8]>) {
            self.pool.release(buf);
        }
    }

    impl WireTap {
        fn new(num_frames: usize, frame_size: usize) -> Arc<Self> {
            let pool = BufferPool::new(num_frames, frame_size);
            Arc::new(Self {
                sink: Arc::new(CaptureSink {
                    pool: Arc::clone(&pool),
                    sent: Mutex::new(Vec::new()),
                }),
                pool,
            })
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sink.sent.lock().unwrap().clone()
        }
    }

    impl FrameTransport for WireTap {
        fn acquire_recv_frame(&self, _timeout: Timeout) -> Option<RecvFrame> {
            None
        }

        fn acquire_send_frame(&self, timeout: Timeout) -> Option<SendFrame> {
            let buf = self.pool.acquire(timeout)?;
            Some(SendFrame::new(
                buf,
                Arc::clone(&self.sink) as Arc<dyn FrameSink>,
            ))
        }

        fn num_recv_frames(&self) -> usize {
            self.pool.num_frames()
        }

        fn recv_frame_size(&self) -> usize {
            self.pool.frame_size()
        }

        fn send_frame_size(&self) -> usize {
            self.pool.frame_size()
        }
    }

    fn samples(n: usize) -> Vec<Complex<i16>> {
        (0..n).map(|i| Complex::new(i as i16, 0)).collect()
    }

    #[test]
    fn burst_fragments_with_correct_flags() {
        // 1000 samples at 300 per packet: fragments of 300/300/300/100.
        let tap = WireTap::new(8, 1472);
        let mut handler = SendHandler::new(
            vec![Arc::clone(&tap) as Arc<dyn FrameTransport>],
            vec![0],
            300,
        );

        let buff = samples(1000);
        let md = TxMetadata::burst_at(TimeSpec::new(5, 0, 100e6));
        let sent = handler
            .send(
                &[&buff],
                1000,
                &md,
                SendMode::FullBuff,
                Timeout::Infinite,
            )
            .unwrap();
        assert_eq!(sent, 1000);

        let wire = tap.sent();
        assert_eq!(wire.len(), 4);

        let infos: Vec<_> = wire
            .iter()
            .map(|pkt| hdr_unpack_be(pkt).unwrap())
            .collect();

        assert_eq!(
            infos
                .iter()
                .map(|i| i.num_payload_words32)
                .collect::<Vec<_>>(),
            vec![300, 300, 300, 100]
        );

        assert!(infos[0].sob);
        assert!(infos[0].has_tsi && infos[0].has_tsf);
        assert_eq!(infos[0].tsi, 5);
        assert_eq!(infos[0].tsf, 0);
        for info in &infos[1..3] {
            assert!(!info.sob && !info.eob);
            assert!(!info.has_tsi && !info.has_tsf);
        }
        assert!(infos[3].eob);

        // The 4-bit counter increments per packet.
        assert_eq!(
            infos.iter().map(|i| i.packet_count).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        // No trailer on transmit.
        assert!(infos.iter().all(|i| !i.has_trailer));
    }

    #[test]
    fn counter_wraps_mod_16() {
        let tap = WireTap::new(8, 1472);
        let mut handler = SendHandler::new(
            vec![Arc::clone(&tap) as Arc<dyn FrameTransport>],
            vec![0],
            10,
        );
        let buff = samples(10);
        for _ in 0..20 {
            handler
                .send(
                    &[&buff],
                    10,
                    &TxMetadata::default(),
                    SendMode::FullBuff,
                    Timeout::Infinite,
                )
                .unwrap();
        }
        let wire = tap.sent();
        assert_eq!(wire.len(), 20);
        let last = hdr_unpack_be(&wire[19]).unwrap();
        assert_eq!(last.packet_count, 19 % 16);
    }

    #[test]
    fn one_packet_mode_clips() {
        let tap = WireTap::new(8, 1472);
        let mut handler = SendHandler::new(
            vec![Arc::clone(&tap) as Arc<dyn FrameTransport>],
            vec![0],
            100,
        );
        let buff = samples(500);
        let sent = handler
            .send(
                &[&buff],
                500,
                &TxMetadata::default(),
                SendMode::OnePacket,
                Timeout::Infinite,
            )
            .unwrap();
        assert_eq!(sent, 100);
        assert_eq!(tap.sent().len(), 1);
    }

    #[test]
    fn acquire_timeout_reports_zero_sent() {
        let tap = WireTap::new(1, 1472);
        // Drain the pool so the first acquire fails.
        let held = tap
            .acquire_send_frame(Timeout::Duration(std::time::Duration::ZERO))
            .unwrap();

        let mut handler = SendHandler::new(
            vec![Arc::clone(&tap) as Arc<dyn FrameTransport>],
            vec![0],
            100,
        );
        let buff = samples(10);
        let result = handler.send(
            &[&buff],
            10,
            &TxMetadata::default(),
            SendMode::FullBuff,
            Timeout::Duration(std::time::Duration::from_millis(5)),
        );
        assert!(matches!(result, Err(SendError::SendTimeout)));
        drop(held);
    }

    #[test]
    fn payload_is_big_endian_iq() {
        let tap = WireTap::new(4, 1472);
        let mut handler = SendHandler::new(
            vec![Arc::clone(&tap) as Arc<dyn FrameTransport>],
            vec![42],
            100,
        );
        let buff = vec![Complex::new(0x0102i16, 0x0304)];
        handler
            .send(
                &[&buff],
                1,
                &TxMetadata::default(),
                SendMode::FullBuff,
                Timeout::Infinite,
            )
            .unwrap();

        let wire = tap.sent();
        let info = hdr_unpack_be(&wire[0]).unwrap();
        assert_eq!(info.stream_id, 42);
        let at = info.num_header_words32 * 4;
        assert_eq!(&wire[0][at..at + 4], &[0x01, 0x02, 0x03, 0x04]);
    }
}
