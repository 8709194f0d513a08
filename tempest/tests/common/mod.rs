//! Shared test doubles for the pipeline integration tests.
#![allow(dead_code)] // each test binary uses its own subset

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use num_complex::Complex;

use tempest::sync::BoundedFifo;
use tempest::time::{TimeSpec, Timeout};
use tempest::transport::{BufferPool, FrameSink, FrameTransport, RecvFrame, SendFrame};
use tempest::vrt::{self, EventCode, IfPacketInfo, PacketType, hdr_pack_be};

pub const TICK_RATE: f64 = 100e6;
pub const FRAME_SIZE: usize = 1472;
pub const NUM_FRAMES: usize = 16;

/// Longest single wait inside the transport double; the deadline loop in
/// `acquire_recv_frame` re-arms around it so `wake` is honored promptly.
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Records everything committed by the send side.
pub struct CaptureSink {
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

/// An in-memory [`FrameTransport`]: tests inject inbound datagrams and
/// inspect outbound ones.
pub struct TestTransport {
    recv_pool: Arc<BufferPool>,
    inbound: BoundedFifo<Vec<u8>>,
    sink: Arc<CaptureSink>,
    woken: AtomicBool,
}

impl TestTransport {
    pub fn new() -> Arc<Self> {
        let send_pool = BufferPool::new(NUM_FRAMES, FRAME_SIZE);
        Arc::new(Self {
            recv_pool: BufferPool::new(NUM_FRAMES, FRAME_SIZE),
            inbound: BoundedFifo::new(256),
            sink: Arc::new(CaptureSink {
                pool: send_pool,
                sent: Mutex::new(Vec::new()),
            }),
            woken: AtomicBool::new(false),
        })
    }

    /// Queues an inbound datagram for the scavenger to pick up.
    pub fn inject(&self, datagram: Vec<u8>) {
        self.inbound.push_with_pop_on_full(datagram);
    }

    /// Everything committed on the send side so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sink.sent.lock().unwrap().clone()
    }

    /// Free receive buffers; equals `NUM_FRAMES` when no frame is
    /// outstanding anywhere in the pipeline.
    pub fn recv_frames_free(&self) -> usize {
        self.recv_pool.available()
    }
}

impl FrameTransport for TestTransport {
    fn acquire_recv_frame(&self, timeout: Timeout) -> Option<RecvFrame> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(std::time::Instant::now() + d),
        };
        loop {
            if self.woken.swap(false, Ordering::AcqRel) {
                return None;
            }
            let slice = match deadline {
                None => POLL_SLICE,
                Some(at) => {
                    let now = std::time::Instant::now();
                    if now >= at {
                        return None;
                    }
                    (at - now).min(POLL_SLICE)
                }
            };
            if let Some(bytes) = self.inbound.pop_timed(Timeout::Duration(slice)) {
                let mut buf = self.recv_pool.acquire(Timeout::Infinite)?;
                buf[..bytes.len()].copy_from_slice(&bytes);
                return Some(RecvFrame::new(buf, bytes.len(), Arc::clone(&self.recv_pool)));
            }
        }
    }

    fn acquire_send_frame(&self, timeout: Timeout) -> Option<SendFrame> {
        let buf = self.sink.pool.acquire(timeout)?;
        Some(SendFrame::new(
            buf,
            Arc::clone(&self.sink) as Arc<dyn FrameSink>,
        ))
    }

    fn num_recv_frames(&self) -> usize {
        NUM_FRAMES
    }

    fn recv_frame_size(&self) -> usize {
        FRAME_SIZE
    }

    fn send_frame_size(&self) -> usize {
        FRAME_SIZE
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
    }
}

/// Builds a data packet as the device would emit it: both timestamps,
/// mandatory trailer.
pub fn data_packet(packet_count: u8, secs: u32, samples: &[Complex<i16>]) -> Vec<u8> {
    let mut info = IfPacketInfo {
        packet_type: PacketType::Data,
        stream_id: 0,
        packet_count,
        has_tsi: true,
        tsi: secs,
        has_tsf: true,
        tsf: 0,
        has_trailer: true,
        num_payload_words32: samples.len(),
        ..IfPacketInfo::default()
    };
    let mut buf = vec![0u8; FRAME_SIZE];
    let hdr_words = hdr_pack_be(&mut buf, &mut info);
    tempest::convert::samples_to_otw(samples, &mut buf[hdr_words * 4..]);
    buf.truncate(info.num_packet_words32 * 4);
    buf
}

/// Builds a TX async status report: context packet on the async stream id.
pub fn async_packet(event: EventCode, time: Option<(u32, u64)>) -> Vec<u8> {
    let (tsi, tsf) = time.unwrap_or((0, 0));
    let mut info = IfPacketInfo {
        packet_type: PacketType::IfContext,
        stream_id: vrt::ASYNC_SID,
        has_tsi: time.is_some(),
        tsi,
        has_tsf: time.is_some(),
        tsf,
        num_payload_words32: 1,
        ..IfPacketInfo::default()
    };
    let mut buf = vec![0u8; 256];
    let hdr_words = hdr_pack_be(&mut buf, &mut info);
    buf[hdr_words * 4..hdr_words * 4 + 4]
        .copy_from_slice(&u32::from(event.bits()).to_be_bytes());
    buf.truncate(info.num_packet_words32 * 4);
    buf
}

/// A short ramp of 16-bit samples for payload checks.
pub fn ramp(start: i16, len: usize) -> Vec<Complex<i16>> {
    (0..len as i16)
        .map(|i| Complex::new(start + i, -(start + i)))
        .collect()
}

/// A device time at an integer second.
pub fn at(secs: i64) -> TimeSpec {
    TimeSpec::new(secs, 0, TICK_RATE)
}
