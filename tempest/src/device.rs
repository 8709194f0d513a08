//! Device assembly: motherboards plus the streaming pipeline.
//!
//! A [`Device`] owns one or more [`Motherboard`]s and the [`StreamIo`]
//! pipeline spanning their data transports. Ownership is one-way: the
//! overflow hook routes back to a motherboard through a closure wired at
//! bring-up, never through a reference held by the motherboard itself.

pub mod flow_ctrl;
pub mod iface;
pub mod mboard;
pub mod regs;

pub use iface::{IfaceError, RegIface};
pub use mboard::{ChannelState, DeviceError, Motherboard, StreamCmd, StreamMode};

use std::sync::Arc;

use crate::config::DeviceOptions;
use crate::convert::Sample;
use crate::stream::{
    OverflowHook, RecvMode, RxMetadata, SendError, SendMode, StreamIo, StreamIoOptions,
    TxMetadata,
};
use crate::stream::AsyncMetadata;
use crate::time::{TimeSpec, Timeout};
use crate::trace::info;
use crate::transport::FrameTransport;

/// Everything needed to bring up one motherboard.
pub struct MotherboardSetup {
    /// Register access over the control channel.
    pub iface: Arc<dyn RegIface>,
    /// One transport per DSP data channel, in channel order; for a UDP
    /// board these connect to
    /// [`DeviceEndpoints::data`](crate::net::DeviceEndpoints::data).
    pub data_transports: Vec<Arc<dyn FrameTransport>>,
    /// The error channel, surfaced only as a transport to poll.
    pub err_transport: Option<Arc<dyn FrameTransport>>,
    /// Master clock rate in Hz.
    pub master_clock_rate: f64,
}

/// A fully brought-up device.
pub struct Device {
    // Declaration order is drop order: the pipeline joins its workers
    // before the motherboards zero their registers.
    io: StreamIo,
    mboards: Vec<Arc<Motherboard>>,
    err_transports: Vec<Option<Arc<dyn FrameTransport>>>,
    channels_per_mboard: usize,
}

impl Device {
    /// Walks every channel through bring-up and starts the pipeline.
    ///
    /// Per motherboard: resolve the MIMO role, probe each data transport
    /// (source-port latch), purge each DSP (stale-session flush + sequence
    /// clear), program flow control, then spawn the scavengers.
    ///
    /// # Errors
    ///
    /// Returns the first bring-up failure; transports probed so far are
    /// left harmless (the device ignores repeated probes).
    ///
    /// # Panics
    ///
    /// Panics if `setups` is empty or the motherboards disagree on channel
    /// count or clock rate.
    pub fn new(setups: Vec<MotherboardSetup>, options: &DeviceOptions) -> Result<Self, DeviceError> {
        assert!(!setups.is_empty(), "need at least one motherboard");
        let channels_per_mboard = setups[0].data_transports.len();
        let tick_rate = setups[0].master_clock_rate;
        assert!(
            setups.iter().all(|s| {
                s.data_transports.len() == channels_per_mboard
                    && s.master_clock_rate == tick_rate
            }),
            "motherboards must be identical"
        );

        let mut mboards = Vec::with_capacity(setups.len());
        let mut err_transports = Vec::with_capacity(setups.len());
        let mut data_transports: Vec<Arc<dyn FrameTransport>> = Vec::new();

        for setup in setups {
            let mboard = Arc::new(Motherboard::new(
                Arc::clone(&setup.iface),
                setup.master_clock_rate,
                channels_per_mboard,
                options,
            )?);

            for (dsp, transport) in setup.data_transports.iter().enumerate() {
                mboard.probe_transport(transport, dsp)?;
                mboard.purge_dsp(transport, dsp)?;
            }
            let send_frame_size = setup.data_transports[0].send_frame_size();
            mboard.init_flow_control(send_frame_size, options)?;

            data_transports.extend(setup.data_transports);
            err_transports.push(setup.err_transport);
            mboards.push(mboard);
        }

        // Route channel index → owning motherboard for overflow recovery.
        let hook_mboards: Vec<Arc<Motherboard>> = mboards.clone();
        let overflow_hook: OverflowHook = Arc::new(move |chan| {
            let mboard = &hook_mboards[chan / channels_per_mboard];
            mboard.handle_overflow(chan % channels_per_mboard);
        });

        let io = StreamIo::new(
            data_transports,
            tick_rate,
            StreamIoOptions {
                overflow_hook: Some(overflow_hook),
                pin_scavengers: options.pin_scavengers,
                ..StreamIoOptions::default()
            },
        );
        for mboard in &mboards {
            for dsp in 0..channels_per_mboard {
                mboard.mark_ready(dsp);
            }
        }
        info!(
            mboards = mboards.len(),
            channels = mboards.len() * channels_per_mboard,
            "device ready"
        );

        Ok(Self {
            io,
            mboards,
            err_transports,
            channels_per_mboard,
        })
    }

    /// The streaming pipeline.
    #[must_use]
    pub const fn io(&self) -> &StreamIo {
        &self.io
    }

    /// Motherboard controllers, in channel order.
    #[must_use]
    pub fn mboards(&self) -> &[Arc<Motherboard>] {
        &self.mboards
    }

    /// Total channel count across motherboards.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.mboards.len() * self.channels_per_mboard
    }

    /// Receives aligned samples across all channels.
    pub fn recv<T: Sample>(
        &self,
        buffs: &mut [&mut [T]],
        num_samps: usize,
        metadata: &mut RxMetadata,
        mode: RecvMode,
        timeout: Timeout,
    ) -> usize {
        self.io.recv(buffs, num_samps, metadata, mode, timeout)
    }

    /// Transmits samples across all channels.
    ///
    /// # Errors
    ///
    /// Propagates [`SendError`] from the pipeline.
    pub fn send<T: Sample>(
        &self,
        buffs: &[&[T]],
        num_samps: usize,
        metadata: &TxMetadata,
        mode: SendMode,
        timeout: Timeout,
    ) -> Result<usize, SendError> {
        self.io.send(buffs, num_samps, metadata, mode, timeout)
    }

    /// Pops the next TX async status report.
    pub fn recv_async_msg(&self, timeout: Timeout) -> Option<AsyncMetadata> {
        self.io.recv_async_msg(timeout)
    }

    /// Issues a stream command on a device-wide channel index.
    ///
    /// # Errors
    ///
    /// Propagates register errors from the owning motherboard.
    pub fn issue_stream_cmd(&self, chan: usize, cmd: &StreamCmd) -> Result<(), DeviceError> {
        self.mboards[chan / self.channels_per_mboard]
            .issue_stream_cmd(chan % self.channels_per_mboard, cmd)
    }

    /// Sets the time on every MIMO master immediately.
    ///
    /// Slaves are skipped: they follow the serdes clock.
    ///
    /// # Errors
    ///
    /// Propagates the first register failure.
    pub fn set_time_now(&self, time: TimeSpec) -> Result<(), DeviceError> {
        for mboard in &self.mboards {
            if mboard.is_mimo_master() {
                mboard.set_time(time, true)?;
            }
        }
        Ok(())
    }

    /// Arms a time set for the next PPS edge on every MIMO master.
    ///
    /// # Errors
    ///
    /// Propagates the first register failure.
    pub fn set_time_next_pps(&self, time: TimeSpec) -> Result<(), DeviceError> {
        for mboard in &self.mboards {
            if mboard.is_mimo_master() {
                mboard.set_time(time, false)?;
            }
        }
        Ok(())
    }

    /// The error-channel transport of motherboard `mboard`, for polling.
    #[must_use]
    pub fn err_transport(&self, mboard: usize) -> Option<&Arc<dyn FrameTransport>> {
        self.err_transports.get(mboard)?.as_ref()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        for mboard in &self.mboards {
            mboard.begin_teardown();
        }
        // StreamIo's own drop joins the workers; Motherboard drops then
        // zero the flow-control registers.
    }
}
