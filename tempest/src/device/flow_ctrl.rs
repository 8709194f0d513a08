//! TX flow-control update timers.
//!
//! The device reports transmit-ring occupancy upstream on two schedules: a
//! cycle counter (updates per second) and a packet counter (updates per
//! ring fraction). Both are programmed at bring-up and zeroed at teardown.

use crate::config::DeviceOptions;
use crate::trace::debug;

use super::iface::{IfaceError, RegIface};
use super::regs;

/// Programs both update timers from the device options.
///
/// A zero rate disables the corresponding timer by leaving its register
/// untouched (it powers up disabled).
///
/// # Errors
///
/// Returns an [`IfaceError`] if a register write fails.
pub fn configure(
    iface: &dyn RegIface,
    master_clock_rate: f64,
    send_frame_size: usize,
    options: &DeviceOptions,
) -> Result<(), IfaceError> {
    if options.ups_per_sec > 0.0 {
        let cycles_per_up = (master_clock_rate / options.ups_per_sec) as u32;
        iface.poke32(
            regs::REG_TX_CTRL_CYCLES_PER_UP,
            regs::FLAG_TX_CTRL_UP_ENB | cycles_per_up,
        )?;
        debug!(cycles_per_up, "enabled cycle-based flow control updates");
    }
    if options.ups_per_fifo > 0.0 {
        let packets_per_up =
            (regs::SRAM_BYTES as f64 / options.ups_per_fifo / send_frame_size as f64) as u32;
        iface.poke32(
            regs::REG_TX_CTRL_PACKETS_PER_UP,
            regs::FLAG_TX_CTRL_UP_ENB | packets_per_up,
        )?;
        debug!(packets_per_up, "enabled packet-based flow control updates");
    }
    Ok(())
}

/// Zeroes both update timers, suppressing errors.
///
/// Runs on teardown paths where the control socket may already be gone.
pub fn disable(iface: &dyn RegIface) {
    let _ = iface.poke32(regs::REG_TX_CTRL_CYCLES_PER_UP, 0);
    let _ = iface.poke32(regs::REG_TX_CTRL_PACKETS_PER_UP, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PokeLog {
        pokes: Mutex<Vec<(u32, u32)>>,
        fail: bool,
    }

    impl RegIface for PokeLog {
        fn poke32(&self, addr: u32, value: u32) -> Result<(), IfaceError> {
            if self.fail {
                return Err(IfaceError::Timeout);
            }
            self.pokes.lock().unwrap().push((addr, value));
            Ok(())
        }

        fn peek32(&self, _addr: u32) -> Result<u32, IfaceError> {
            Ok(0)
        }
    }

    #[test]
    fn defaults_program_both_timers() {
        let iface = PokeLog::default();
        let options = DeviceOptions::default();
        configure(&iface, 100e6, 1472, &options).unwrap();

        let pokes = iface.pokes.lock().unwrap();
        assert_eq!(pokes.len(), 2);

        // 100 MHz / 20 ups
        assert_eq!(
            pokes[0],
            (
                regs::REG_TX_CTRL_CYCLES_PER_UP,
                regs::FLAG_TX_CTRL_UP_ENB | 5_000_000
            )
        );
        // 1 MiB / 8 / 1472 bytes
        assert_eq!(
            pokes[1],
            (
                regs::REG_TX_CTRL_PACKETS_PER_UP,
                regs::FLAG_TX_CTRL_UP_ENB | 89
            )
        );
    }

    #[test]
    fn zero_rates_disable() {
        let iface = PokeLog::default();
        let options = DeviceOptions {
            ups_per_sec: 0.0,
            ups_per_fifo: 0.0,
            ..DeviceOptions::default()
        };
        configure(&iface, 100e6, 1472, &options).unwrap();
        assert!(iface.pokes.lock().unwrap().is_empty());
    }

    #[test]
    fn disable_swallows_errors() {
        let iface = PokeLog {
            fail: true,
            ..PokeLog::default()
        };
        disable(&iface); // must not panic or return an error
    }
}
