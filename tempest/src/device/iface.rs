//! Injected register access.
//!
//! The control-channel peek/poke protocol (and everything behind it:
//! EEPROM, clock PLL, daughterboards) is an external collaborator. The
//! streaming core only needs these two operations.

use thiserror::Error;

/// Errors surfaced by a register transport.
#[derive(Debug, Error)]
pub enum IfaceError {
    /// The control channel failed.
    #[error("control transport error: {0}")]
    Io(#[from] std::io::Error),
    /// No acknowledgment within the control protocol deadline.
    #[error("control transaction timed out")]
    Timeout,
}

/// 32-bit register access to one motherboard.
pub trait RegIface: Send + Sync {
    /// Writes `value` to the settings-bus register at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an [`IfaceError`] if the control transaction fails.
    fn poke32(&self, addr: u32, value: u32) -> Result<(), IfaceError>;

    /// Reads the settings-bus register at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an [`IfaceError`] if the control transaction fails.
    fn peek32(&self, addr: u32) -> Result<u32, IfaceError>;
}
