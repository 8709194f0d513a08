//! The assembled streaming pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crate::convert::Sample;
use crate::sync::BoundedFifo;
use crate::time::Timeout;
use crate::trace::{debug, info};
use crate::transport::FrameTransport;

use super::alignment::AlignmentBuffer;
use super::metadata::{AsyncMetadata, RxMetadata, TxMetadata};
use super::recv::{RecvHandler, RecvMode};
use super::scavenger::{self, ScavengerCtx};
use super::send::{SendError, SendHandler, SendMode};
use super::{OverflowHook, max_recv_samps_per_packet, max_send_samps_per_packet};

/// Depth of the async status FIFO, in messages.
const ASYNC_FIFO_DEPTH: usize = 100;

/// The transport recv pool must keep this many frames free for refill
/// while the alignment buffer is full, or producer and consumer deadlock.
const POOL_HEADROOM_FRAMES: usize = 3;

/// Knobs for assembling a [`StreamIo`].
pub struct StreamIoOptions {
    /// TX stream id per channel.
    pub stream_ids: Vec<u32>,
    /// Invoked (from a scavenger thread) with the channel index when a
    /// receive sequence gap is detected.
    pub overflow_hook: Option<OverflowHook>,
    /// Pin scavenger threads round-robin over the available cores.
    pub pin_scavengers: bool,
}

impl Default for StreamIoOptions {
    fn default() -> Self {
        Self {
            stream_ids: Vec::new(),
            overflow_hook: None,
            pin_scavengers: false,
        }
    }
}

/// The streaming I/O pipeline for one device.
///
/// Owns one scavenger thread per data transport, the alignment buffer they
/// feed, and the async status FIFO. Dropping a `StreamIo` stops the
/// workers: the run flag clears, blocked transport reads are woken, and
/// every thread is joined.
pub struct StreamIo {
    transports: Vec<Arc<dyn FrameTransport>>,
    alignment: Arc<AlignmentBuffer>,
    async_fifo: Arc<BoundedFifo<AsyncMetadata>>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    recv_handler: Mutex<RecvHandler>,
    send_handler: Mutex<SendHandler>,
    max_recv_samps: usize,
    max_send_samps: usize,
}

impl StreamIo {
    /// Assembles the pipeline and spawns one scavenger per transport.
    ///
    /// `tick_rate` is the master clock rate used to interpret fractional
    /// timestamps. All transports are assumed identical; the first one's
    /// geometry sizes the packet budgets and the alignment depth.
    ///
    /// # Panics
    ///
    /// Panics if `transports` is empty, a recv pool holds fewer than four
    /// frames, or a scavenger thread cannot be spawned.
    #[must_use]
    pub fn new(
        transports: Vec<Arc<dyn FrameTransport>>,
        tick_rate: f64,
        options: StreamIoOptions,
    ) -> Self {
        assert!(!transports.is_empty(), "need at least one data transport");
        let width = transports.len();
        let num_frames = transports[0].num_recv_frames();
        assert!(
            num_frames > POOL_HEADROOM_FRAMES,
            "recv pool too small to leave refill headroom"
        );

        let alignment = Arc::new(AlignmentBuffer::new(
            width,
            num_frames - POOL_HEADROOM_FRAMES,
        ));
        let async_fifo = Arc::new(BoundedFifo::new(ASYNC_FIFO_DEPTH));
        let running = Arc::new(AtomicBool::new(true));

        let cores = if options.pin_scavengers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut workers = Vec::with_capacity(width);
        for (index, transport) in transports.iter().enumerate() {
            let ctx = ScavengerCtx {
                transport: Arc::clone(transport),
                index,
                tick_rate,
                alignment: Arc::clone(&alignment),
                async_fifo: Arc::clone(&async_fifo),
                running: Arc::clone(&running),
                overflow_hook: options.overflow_hook.clone(),
            };
            let core = (!cores.is_empty()).then(|| cores[index % cores.len()]);
            let handle = std::thread::Builder::new()
                .name(format!("tempest-scav-{index}"))
                .spawn(move || {
                    if let Some(core) = core
                        && !core_affinity::set_for_current(core)
                    {
                        debug!(index, "core pinning failed, running unpinned");
                    }
                    scavenger::run(&ctx);
                })
                .expect("failed to spawn scavenger thread");
            workers.push(handle);
        }
        info!(width, "streaming pipeline started");

        let max_recv_samps = max_recv_samps_per_packet(transports[0].recv_frame_size());
        let max_send_samps = max_send_samps_per_packet(transports[0].send_frame_size());

        let mut stream_ids = options.stream_ids;
        stream_ids.resize(width, 0);

        Self {
            recv_handler: Mutex::new(RecvHandler::new(Arc::clone(&alignment), width, tick_rate)),
            send_handler: Mutex::new(SendHandler::new(
                transports.clone(),
                stream_ids,
                max_send_samps,
            )),
            transports,
            alignment,
            async_fifo,
            running,
            workers,
            max_recv_samps,
            max_send_samps,
        }
    }

    /// Largest sample count deliverable in one receive packet.
    #[must_use]
    pub const fn max_recv_samps_per_packet(&self) -> usize {
        self.max_recv_samps
    }

    /// Largest sample count transmittable in one packet.
    #[must_use]
    pub const fn max_send_samps_per_packet(&self) -> usize {
        self.max_send_samps
    }

    /// Number of channels (data transports).
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.transports.len()
    }

    /// Receives aligned samples into one buffer per channel.
    ///
    /// See [`RecvHandler::recv`](super::recv::RecvHandler::recv).
    pub fn recv<T: Sample>(
        &self,
        buffs: &mut [&mut [T]],
        num_samps: usize,
        metadata: &mut RxMetadata,
        mode: RecvMode,
        timeout: Timeout,
    ) -> usize {
        self.recv_handler
            .lock()
            .expect("recv handler poisoned")
            .recv(buffs, num_samps, metadata, mode, timeout)
    }

    /// Transmits samples from one buffer per channel.
    ///
    /// See [`SendHandler::send`](super::send::SendHandler::send).
    ///
    /// # Errors
    ///
    /// Propagates [`SendError`] from the handler.
    pub fn send<T: Sample>(
        &self,
        buffs: &[&[T]],
        num_samps: usize,
        metadata: &TxMetadata,
        mode: SendMode,
        timeout: Timeout,
    ) -> Result<usize, SendError> {
        self.send_handler
            .lock()
            .expect("send handler poisoned")
            .send(buffs, num_samps, metadata, mode, timeout)
    }

    /// Pops the next TX async status report.
    pub fn recv_async_msg(&self, timeout: Timeout) -> Option<AsyncMetadata> {
        self.async_fifo.pop_timed(timeout)
    }

    /// True when no aligned data is pending anywhere in the buffer.
    #[must_use]
    pub fn rx_idle(&self) -> bool {
        self.alignment.is_empty()
    }
}

impl Drop for StreamIo {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        for transport in &self.transports {
            transport.wake();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("streaming pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BufferPool, RecvFrame, SendFrame};
    use std::time::Duration;

    /// A transport that never produces or accepts anything.
    struct DeadTransport {
        pool: Arc<BufferPool>,
    }

    impl FrameTransport for DeadTransport {
        fn acquire_recv_frame(&self, timeout: Timeout) -> Option<RecvFrame> {
            // Block as a real transport would so shutdown has to wake us.
            let _ = self.pool.acquire(timeout);
            None
        }

        fn acquire_send_frame(&self, _timeout: Timeout) -> Option<SendFrame> {
            None
        }

        fn num_recv_frames(&self) -> usize {
            32
        }

        fn recv_frame_size(&self) -> usize {
            1472
        }

        fn send_frame_size(&self) -> usize {
            1472
        }
    }

    #[test]
    fn spawns_and_joins_cleanly() {
        let transports: Vec<Arc<dyn FrameTransport>> = (0..2)
            .map(|_| {
                Arc::new(DeadTransport {
                    pool: BufferPool::new(1, 8),
                }) as Arc<dyn FrameTransport>
            })
            .collect();
        let io = StreamIo::new(transports, 100e6, StreamIoOptions::default());
        assert_eq!(io.num_channels(), 2);
        assert!(io.rx_idle());
        // 1472-byte frames: (1472 - 24) / 4 receive samples.
        assert_eq!(io.max_recv_samps_per_packet(), 362);
        assert_eq!(io.max_send_samps_per_packet(), 363);
        drop(io); // joins both workers
    }

    #[test]
    fn recv_times_out_on_silent_transports() {
        let transports: Vec<Arc<dyn FrameTransport>> = vec![Arc::new(DeadTransport {
            pool: BufferPool::new(1, 8),
        }) as Arc<dyn FrameTransport>];
        let io = StreamIo::new(transports, 100e6, StreamIoOptions::default());

        let mut out = vec![num_complex::Complex::<i16>::default(); 8];
        let mut md = RxMetadata::default();
        let got = io.recv(
            &mut [&mut out],
            8,
            &mut md,
            RecvMode::FullBuff,
            Timeout::Duration(Duration::from_millis(10)),
        );
        assert_eq!(got, 0);
        assert_eq!(md.error, Some(crate::stream::RxErrorCode::Timeout));
    }
}
