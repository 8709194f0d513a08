//! VRT-style interface packet framing.
//!
//! Every datagram on a DSP data channel is one IF packet: a big-endian
//! header of 1..[`MAX_IF_HDR_WORDS32`] 32-bit words, a payload, and (on
//! receive only) a trailer word. The framer is bit-exact and allocation
//! free in both directions.

pub mod context;
pub mod header;

pub use context::{EventCode, context_event_code};
pub use header::{
    HeaderError, IfPacketInfo, INVALID_VRT_HEADER, MAX_IF_HDR_WORDS32, PacketType, hdr_pack_be,
    hdr_unpack_be,
};

/// Stream id reserved for TX async status reports on a data channel.
pub const ASYNC_SID: u32 = 1;
