//! Device register map.
//!
//! Word addresses into the settings bus, reached through
//! [`RegIface`](super::iface::RegIface). Only the registers the streaming
//! core programs are listed; the peek/poke transport itself lives outside
//! this crate.

/// Device-side transmit ring size in bytes.
pub const SRAM_BYTES: usize = 1 << 20;

/// Global status word; see the `STATUS_*` masks.
pub const REG_STATUS: u32 = 0x0004;

/// Set in [`REG_STATUS`] when the board drives the MIMO clock.
pub const STATUS_MIMO_MASTER: u32 = 1 << 8;

// time64: 64-bit device time, latched by writing the seconds register
pub const REG_TIME64_TICKS: u32 = 0x0100;
pub const REG_TIME64_FLAGS: u32 = 0x0104;
pub const REG_TIME64_IMM: u32 = 0x0108;
pub const REG_TIME64_SECS: u32 = 0x010c;
pub const REG_TIME64_SECS_RB_IMM: u32 = 0x0110;
pub const REG_TIME64_TICKS_RB_IMM: u32 = 0x0114;
pub const REG_TIME64_SECS_RB_PPS: u32 = 0x0118;
pub const REG_TIME64_TICKS_RB_PPS: u32 = 0x011c;

/// Latch the written time immediately.
pub const FLAG_TIME64_LATCH_NOW: u32 = 1;
/// Latch the written time on the next PPS edge.
pub const FLAG_TIME64_LATCH_NEXT_PPS: u32 = 0;

// tx_ctrl: periodic upstream flow-control updates
pub const REG_TX_CTRL_CYCLES_PER_UP: u32 = 0x0200;
pub const REG_TX_CTRL_PACKETS_PER_UP: u32 = 0x0204;

/// Or'd into either update register to enable it.
pub const FLAG_TX_CTRL_UP_ENB: u32 = 1 << 31;

// rx_ctrl: one block per DSP
const RX_CTRL_BASE: u32 = 0x0300;
const RX_CTRL_STRIDE: u32 = 0x20;

/// Stream command word for DSP `dsp`; writing the time registers below
/// latches the command.
#[must_use]
pub const fn reg_rx_ctrl_stream_cmd(dsp: usize) -> u32 {
    RX_CTRL_BASE + dsp as u32 * RX_CTRL_STRIDE
}

#[must_use]
pub const fn reg_rx_ctrl_time_secs(dsp: usize) -> u32 {
    RX_CTRL_BASE + dsp as u32 * RX_CTRL_STRIDE + 0x4
}

#[must_use]
pub const fn reg_rx_ctrl_time_ticks(dsp: usize) -> u32 {
    RX_CTRL_BASE + dsp as u32 * RX_CTRL_STRIDE + 0x8
}

/// Writing 1 resets DSP `dsp`'s packet sequence counter.
#[must_use]
pub const fn reg_rx_ctrl_clear(dsp: usize) -> u32 {
    RX_CTRL_BASE + dsp as u32 * RX_CTRL_STRIDE + 0xc
}
