//! Device-level configuration options.

use serde::Deserialize;

/// MIMO clocking role of a motherboard.
///
/// The master drives the shared clock and PPS over the serdes link; a slave
/// follows it and rejects host time sets. `Auto` resolves the role from the
/// device status register at bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimoMode {
    Master,
    Slave,
    #[default]
    Auto,
}

/// Options consumed by the streaming core at bring-up.
///
/// Mirrors the key/value device address arguments of the control protocol;
/// all fields have conservative defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    /// Periodic TX flow-control update rate in updates per second.
    /// Zero disables the cycle-based update timer.
    pub ups_per_sec: f64,
    /// TX flow-control granularity as a fraction of the device SRAM ring.
    /// Zero disables the packet-count-based update timer.
    pub ups_per_fifo: f64,
    /// MIMO clocking role.
    pub mimo_mode: MimoMode,
    /// Pin each scavenger thread to a CPU core (round-robin over the
    /// available cores). Off by default; useful on dedicated capture hosts.
    pub pin_scavengers: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            ups_per_sec: 20.0,
            ups_per_fifo: 8.0,
            mimo_mode: MimoMode::Auto,
            pin_scavengers: false,
        }
    }
}
