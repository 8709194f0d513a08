//! Per-motherboard control: MIMO role, device time, subdevice routing,
//! stream commands, and the per-channel bring-up state machine.
//!
//! Bring-up walks each DSP channel through
//! `Cold → Probed → SeqReset → Ready`: first a probe datagram teaches the
//! device our UDP source port (otherwise its async packets draw ICMP
//! unreachable), then a one-sample solicited stream flushes any state a
//! prior session left behind and the sequence counter is cleared. Teardown
//! reverses through `Draining → Closed`, zeroing the flow-control timers
//! with errors suppressed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::config::{DeviceOptions, MimoMode};
use crate::time::{TimeSpec, Timeout};
use crate::trace::{debug, info, warn};
use crate::transport::FrameTransport;
use crate::vrt::INVALID_VRT_HEADER;

use super::flow_ctrl;
use super::iface::{IfaceError, RegIface};
use super::regs;

/// Deadline for each drain read during the bring-up purge.
const PURGE_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Bounded retries for the time readback consistency loop.
const TIME_READBACK_ATTEMPTS: usize = 100;

/// Errors from motherboard control.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A register transaction failed.
    #[error(transparent)]
    Iface(#[from] IfaceError),
    /// Time sets are rejected on a MIMO slave; it follows the serdes clock.
    #[error("cannot set time on a MIMO slave")]
    MimoSlave,
    /// More subdevices named than the board has DSPs.
    #[error("subdev spec names {got} subdevices, board has {max} DSPs")]
    InvalidSubdevSpec { got: usize, max: usize },
    /// The probe datagram could not be sent.
    #[error("transport probe failed: {0}")]
    Probe(#[from] std::io::Error),
    /// Consecutive time readbacks never agreed.
    #[error("device time readback unstable")]
    UnstableTime,
}

/// Bring-up state of one DSP channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Cold,
    Probed,
    SeqReset,
    Ready,
    Draining,
    Closed,
}

/// How an RX DSP should stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    StartContinuous,
    StopContinuous,
    NumSampsAndDone(u32),
    NumSampsAndMore(u32),
}

/// A command to an RX DSP.
#[derive(Debug, Clone, Copy)]
pub struct StreamCmd {
    pub mode: StreamMode,
    /// Act immediately rather than at `time`.
    pub stream_now: bool,
    /// Start time when `stream_now` is false.
    pub time: Option<TimeSpec>,
}

impl StreamCmd {
    /// An immediate command with the given mode.
    #[must_use]
    pub const fn now(mode: StreamMode) -> Self {
        Self {
            mode,
            stream_now: true,
            time: None,
        }
    }

    /// Encodes the command word the RX control block consumes.
    #[must_use]
    fn cmd_word(&self) -> u32 {
        // reload, chain, samps, stop
        let (reload, chain, samps, stop) = match self.mode {
            StreamMode::StartContinuous => (true, true, false, false),
            StreamMode::StopContinuous => (false, false, false, true),
            StreamMode::NumSampsAndDone(_) => (false, false, true, false),
            StreamMode::NumSampsAndMore(_) => (false, true, true, false),
        };
        let num_samps = match self.mode {
            StreamMode::NumSampsAndDone(n) | StreamMode::NumSampsAndMore(n) => n,
            StreamMode::StartContinuous => 1,
            StreamMode::StopContinuous => 0,
        };
        u32::from(self.stream_now) << 31
            | u32::from(chain) << 30
            | u32::from(reload) << 29
            | u32::from(stop) << 28
            | if samps {
                num_samps
            } else if stop {
                0
            } else {
                1
            }
    }
}

/// Mutable motherboard state behind one lock.
struct MbState {
    rx_subdev_spec: Vec<String>,
    tx_subdev_spec: Vec<String>,
    channel_states: Vec<ChannelState>,
    /// Per DSP: a continuous stream command is in effect.
    continuous: Vec<bool>,
}

/// One motherboard: the control-side collaborator of the streaming core.
pub struct Motherboard {
    iface: Arc<dyn RegIface>,
    master_clock_rate: f64,
    mimo_master: bool,
    num_rx_dsps: usize,
    state: Mutex<MbState>,
}

impl Motherboard {
    /// Creates the controller and resolves the MIMO role.
    ///
    /// `Auto` reads the role from the status register; an explicit mode
    /// skips the readback.
    ///
    /// # Errors
    ///
    /// Returns an error if the status readback fails.
    pub fn new(
        iface: Arc<dyn RegIface>,
        master_clock_rate: f64,
        num_rx_dsps: usize,
        options: &DeviceOptions,
    ) -> Result<Self, DeviceError> {
        let mimo_master = match options.mimo_mode {
            MimoMode::Master => true,
            MimoMode::Slave => false,
            MimoMode::Auto => iface.peek32(regs::REG_STATUS)? & regs::STATUS_MIMO_MASTER != 0,
        };
        info!(
            mimo_master,
            master_clock_rate, "motherboard controller ready"
        );
        Ok(Self {
            iface,
            master_clock_rate,
            mimo_master,
            num_rx_dsps,
            state: Mutex::new(MbState {
                rx_subdev_spec: Vec::new(),
                tx_subdev_spec: Vec::new(),
                channel_states: vec![ChannelState::Cold; num_rx_dsps],
                continuous: vec![false; num_rx_dsps],
            }),
        })
    }

    /// Master clock rate in Hz; doubles as the timestamp tick rate.
    #[must_use]
    pub const fn master_clock_rate(&self) -> f64 {
        self.master_clock_rate
    }

    /// True when this board drives the MIMO clock.
    #[must_use]
    pub const fn is_mimo_master(&self) -> bool {
        self.mimo_master
    }

    /// Number of RX DSP channels.
    #[must_use]
    pub const fn num_rx_dsps(&self) -> usize {
        self.num_rx_dsps
    }

    /// Bring-up state of DSP `dsp`.
    #[must_use]
    pub fn channel_state(&self, dsp: usize) -> ChannelState {
        self.state.lock().expect("mboard poisoned").channel_states[dsp]
    }

    /// `Cold → Probed`: sends the invalid-header probe datagram so the
    /// device latches our source port, then discards any queued junk.
    ///
    /// # Errors
    ///
    /// Returns an error if no send frame is available or the commit fails.
    pub fn probe_transport(
        &self,
        transport: &Arc<dyn FrameTransport>,
        dsp: usize,
    ) -> Result<(), DeviceError> {
        let mut frame = transport
            .acquire_send_frame(Timeout::Duration(Duration::from_secs(1)))
            .ok_or_else(|| {
                DeviceError::Probe(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no send frame for probe",
                ))
            })?;
        frame.as_mut_slice()[..4].copy_from_slice(&INVALID_VRT_HEADER.to_be_bytes());
        frame.commit(4)?;

        // A prior session may have left datagrams in the socket buffer.
        while transport
            .acquire_recv_frame(Timeout::Duration(PURGE_READ_TIMEOUT))
            .is_some()
        {}

        self.set_channel_state(dsp, ChannelState::Probed);
        debug!(dsp, "probe sent, source port latched");
        Ok(())
    }

    /// `Probed → SeqReset`: solicits exactly one packet, drains it along
    /// with anything lingering, and clears the DSP sequence counter.
    ///
    /// Returns the number of packets drained.
    ///
    /// # Errors
    ///
    /// Returns an error if a register write fails.
    pub fn purge_dsp(
        &self,
        transport: &Arc<dyn FrameTransport>,
        dsp: usize,
    ) -> Result<usize, DeviceError> {
        self.issue_stream_cmd(dsp, &StreamCmd::now(StreamMode::NumSampsAndDone(1)))?;

        let mut drained = 0usize;
        while transport
            .acquire_recv_frame(Timeout::Duration(PURGE_READ_TIMEOUT))
            .is_some()
        {
            drained += 1;
        }
        debug!(dsp, drained, "purged stale packets");

        self.iface.poke32(regs::reg_rx_ctrl_clear(dsp), 1)?;
        self.set_channel_state(dsp, ChannelState::SeqReset);
        Ok(drained)
    }

    /// `SeqReset → Ready`: the scavenger for this channel is running and
    /// the alignment buffer is wired in.
    pub fn mark_ready(&self, dsp: usize) {
        self.set_channel_state(dsp, ChannelState::Ready);
    }

    /// Issues a stream command to an RX DSP.
    ///
    /// Writing the time registers latches the command; an immediate
    /// command latches with a zero time.
    ///
    /// # Errors
    ///
    /// Returns an error if a register write fails.
    pub fn issue_stream_cmd(&self, dsp: usize, cmd: &StreamCmd) -> Result<(), DeviceError> {
        let (secs, ticks) = match (cmd.stream_now, cmd.time) {
            (false, Some(time)) => (
                time.full_secs() as u32,
                time.tick_count(self.master_clock_rate),
            ),
            _ => (0, 0),
        };
        self.iface
            .poke32(regs::reg_rx_ctrl_stream_cmd(dsp), cmd.cmd_word())?;
        self.iface.poke32(regs::reg_rx_ctrl_time_secs(dsp), secs)?;
        self.iface.poke32(regs::reg_rx_ctrl_time_ticks(dsp), ticks)?;

        let mut state = self.state.lock().expect("mboard poisoned");
        state.continuous[dsp] = matches!(cmd.mode, StreamMode::StartContinuous);
        Ok(())
    }

    /// Overflow recovery: restart a continuous stream interrupted by
    /// kernel drops. A one-shot stream just runs out; nothing to do.
    pub fn handle_overflow(&self, dsp: usize) {
        let continuous = self.state.lock().expect("mboard poisoned").continuous[dsp];
        if !continuous {
            return;
        }
        if let Err(_e) = self.issue_stream_cmd(dsp, &StreamCmd::now(StreamMode::StartContinuous)) {
            warn!(dsp, error = %_e, "overflow restart failed");
        }
    }

    /// Programs the TX flow-control update timers.
    ///
    /// # Errors
    ///
    /// Returns an error if a register write fails.
    pub fn init_flow_control(
        &self,
        send_frame_size: usize,
        options: &DeviceOptions,
    ) -> Result<(), DeviceError> {
        flow_ctrl::configure(
            self.iface.as_ref(),
            self.master_clock_rate,
            send_frame_size,
            options,
        )?;
        Ok(())
    }

    /// Sets the device time, immediately or at the next PPS edge.
    ///
    /// # Errors
    ///
    /// [`DeviceError::MimoSlave`] on a slave board (its time always comes
    /// over the serdes link), or an iface error.
    pub fn set_time(&self, time: TimeSpec, now: bool) -> Result<(), DeviceError> {
        if !self.mimo_master {
            return Err(DeviceError::MimoSlave);
        }
        self.iface.poke32(
            regs::REG_TIME64_TICKS,
            time.tick_count(self.master_clock_rate),
        )?;
        let imm = if now {
            regs::FLAG_TIME64_LATCH_NOW
        } else {
            regs::FLAG_TIME64_LATCH_NEXT_PPS
        };
        self.iface.poke32(regs::REG_TIME64_IMM, imm)?;
        // The seconds write latches all three registers.
        self.iface
            .poke32(regs::REG_TIME64_SECS, time.full_secs() as u32)?;
        Ok(())
    }

    /// Reads the current device time.
    ///
    /// Seconds are read twice around the ticks; a mismatch means the
    /// second rolled over mid-read and the read retries.
    ///
    /// # Errors
    ///
    /// Returns an iface error, or [`DeviceError::UnstableTime`] if the
    /// readback never settles.
    pub fn time_now(&self) -> Result<TimeSpec, DeviceError> {
        for _ in 0..TIME_READBACK_ATTEMPTS {
            let secs = self.iface.peek32(regs::REG_TIME64_SECS_RB_IMM)?;
            let ticks = self.iface.peek32(regs::REG_TIME64_TICKS_RB_IMM)?;
            if secs == self.iface.peek32(regs::REG_TIME64_SECS_RB_IMM)? {
                return Ok(TimeSpec::new(
                    i64::from(secs),
                    u64::from(ticks),
                    self.master_clock_rate,
                ));
            }
        }
        Err(DeviceError::UnstableTime)
    }

    /// Reads the device time latched at the last PPS edge.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Motherboard::time_now`].
    pub fn time_last_pps(&self) -> Result<TimeSpec, DeviceError> {
        for _ in 0..TIME_READBACK_ATTEMPTS {
            let secs = self.iface.peek32(regs::REG_TIME64_SECS_RB_PPS)?;
            let ticks = self.iface.peek32(regs::REG_TIME64_TICKS_RB_PPS)?;
            if secs == self.iface.peek32(regs::REG_TIME64_SECS_RB_PPS)? {
                return Ok(TimeSpec::new(
                    i64::from(secs),
                    u64::from(ticks),
                    self.master_clock_rate,
                ));
            }
        }
        Err(DeviceError::UnstableTime)
    }

    /// Selects the RX subdevices routed to the DSPs.
    ///
    /// # Errors
    ///
    /// [`DeviceError::InvalidSubdevSpec`] if more subdevices are named
    /// than the board has DSPs.
    pub fn set_rx_subdev_spec(&self, spec: Vec<String>) -> Result<(), DeviceError> {
        if spec.len() > self.num_rx_dsps {
            return Err(DeviceError::InvalidSubdevSpec {
                got: spec.len(),
                max: self.num_rx_dsps,
            });
        }
        self.state.lock().expect("mboard poisoned").rx_subdev_spec = spec;
        Ok(())
    }

    /// Selects the TX subdevice routing.
    ///
    /// # Errors
    ///
    /// [`DeviceError::InvalidSubdevSpec`] as for the RX spec.
    pub fn set_tx_subdev_spec(&self, spec: Vec<String>) -> Result<(), DeviceError> {
        if spec.len() > self.num_rx_dsps {
            return Err(DeviceError::InvalidSubdevSpec {
                got: spec.len(),
                max: self.num_rx_dsps,
            });
        }
        self.state.lock().expect("mboard poisoned").tx_subdev_spec = spec;
        Ok(())
    }

    /// Currently selected RX subdevices.
    #[must_use]
    pub fn rx_subdev_spec(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("mboard poisoned")
            .rx_subdev_spec
            .clone()
    }

    fn set_channel_state(&self, dsp: usize, to: ChannelState) {
        self.state.lock().expect("mboard poisoned").channel_states[dsp] = to;
    }

    /// Marks every channel as draining; called before workers are joined.
    pub(crate) fn begin_teardown(&self) {
        let mut state = self.state.lock().expect("mboard poisoned");
        for channel in &mut state.channel_states {
            *channel = ChannelState::Draining;
        }
    }
}

impl Drop for Motherboard {
    fn drop(&mut self) {
        // Teardown must never fail: the socket may already be dead.
        flow_ctrl::disable(self.iface.as_ref());
        let mut state = self.state.lock().expect("mboard poisoned");
        for channel in &mut state.channel_states {
            *channel = ChannelState::Closed;
        }
    }
}
