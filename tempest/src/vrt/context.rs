//! Context packet payloads.
//!
//! A TX async status report arrives as an IF context packet on the data
//! port with the reserved async stream id. Its first payload word carries
//! an event bitset in the low 16 bits.

use super::header::IfPacketInfo;

/// Bitset of asynchronous transmit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventCode(u16);

impl EventCode {
    /// A burst was transmitted successfully to completion.
    pub const BURST_ACK: Self = Self(0x01);
    /// The transmit ring ran empty between bursts.
    pub const UNDERFLOW: Self = Self(0x02);
    /// A packet arrived out of sequence at the device.
    pub const SEQ_ERROR: Self = Self(0x04);
    /// A packet's requested time was already in the past.
    pub const TIME_ERROR: Self = Self(0x08);
    /// The transmit ring ran empty mid-packet.
    pub const UNDERFLOW_IN_PACKET: Self = Self(0x10);
    /// A packet arrived out of sequence mid-burst.
    pub const SEQ_ERROR_IN_BURST: Self = Self(0x20);

    /// Builds an event code from its raw bit representation.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if any bit of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if either underflow flavor is flagged.
    #[must_use]
    pub const fn is_underflow(self) -> bool {
        self.intersects(Self(Self::UNDERFLOW.0 | Self::UNDERFLOW_IN_PACKET.0))
    }
}

impl std::ops::BitOr for EventCode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Extracts the event code from a context packet.
///
/// `packet` is the full datagram and `info` its decoded header; the event
/// word is the first payload word, big-endian. Returns an empty bitset for
/// a payload-less packet rather than failing: a status report with no event
/// word reports nothing.
#[must_use]
pub fn context_event_code(packet: &[u8], info: &IfPacketInfo) -> EventCode {
    if info.num_payload_words32 == 0 {
        return EventCode::default();
    }
    let at = info.num_header_words32 * 4;
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&packet[at..at + 4]);
    EventCode::from_bits(u32::from_be_bytes(arr) as u16)
}
