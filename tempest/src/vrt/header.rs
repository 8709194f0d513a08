//! IF packet header marshalling.
//!
//! ## Wire format
//!
//! All words are 32 bits, big-endian. Bit fields of the first header word:
//!
//! | Bits  | Field |
//! |-------|-------|
//! | 31:29 | packet type (`0b000` data, `0b010` IF context, `0b011` ext context) |
//! | 28    | stream id present |
//! | 27    | class id present (8 bytes; never emitted, skipped on unpack) |
//! | 26    | trailer present |
//! | 25    | start of burst |
//! | 24    | end of burst |
//! | 23:22 | TSI mode (nonzero: integer-seconds word present) |
//! | 21:20 | TSF mode (nonzero: fractional-ticks double word present) |
//! | 19:16 | packet count, modulo 16 |
//! | 15:0  | total packet size in words |
//!
//! The burst flags live in bits the base standard reserves; the device
//! firmware consumes them on transmit and never sets them on receive.

use thiserror::Error;

/// Largest possible header: word 0, stream id, class id, TSI, TSF.
pub const MAX_IF_HDR_WORDS32: usize = 1 + 1 + 2 + 1 + 2;

/// Reserved sentinel word: not a valid packet type / flags combination.
/// Sent alone in a datagram it acts as a device no-op (source-port probe).
pub const INVALID_VRT_HEADER: u32 = 0;

const TYPE_DATA: u32 = 0b000;
const TYPE_IF_CONTEXT: u32 = 0b010;
const TYPE_EXT_CONTEXT: u32 = 0b011;

/// Kind of IF packet carried by a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Sample payload.
    Data,
    /// IF context packet (async status reports use this).
    IfContext,
    /// Extension context packet.
    ExtContext,
}

/// Errors from header marshalling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Packet shorter than one header word.
    #[error("packet too short for a header word")]
    Truncated,
    /// The packet type tag is not one this device emits.
    #[error("unknown packet type tag {0:#05b}")]
    UnknownPacketType(u32),
    /// Advertised header and trailer overrun the packet length.
    #[error("header length {header} + trailer exceeds packet length {packet}")]
    LengthMismatch { header: usize, packet: usize },
}

/// Decoded IF packet descriptor.
///
/// On unpack every field is filled from the wire. On pack the caller sets
/// the payload length, flags, timestamps, counter and stream id; the word
/// counts are computed and written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfPacketInfo {
    pub packet_type: PacketType,
    /// Payload length in 32-bit words.
    pub num_payload_words32: usize,
    /// Header length in 32-bit words (output of pack/unpack).
    pub num_header_words32: usize,
    /// Total packet length in 32-bit words, trailer included.
    pub num_packet_words32: usize,
    /// Monotonic per-stream counter, modulo 16.
    pub packet_count: u8,
    pub stream_id: u32,
    pub has_tsi: bool,
    pub tsi: u32,
    pub has_tsf: bool,
    pub tsf: u64,
    /// Trailer word present after the payload. Set on receive, clear on send.
    pub has_trailer: bool,
    /// Start of burst (transmit only).
    pub sob: bool,
    /// End of burst (transmit only).
    pub eob: bool,
}

impl Default for IfPacketInfo {
    fn default() -> Self {
        Self {
            packet_type: PacketType::Data,
            num_payload_words32: 0,
            num_header_words32: 0,
            num_packet_words32: 0,
            packet_count: 0,
            stream_id: 0,
            has_tsi: false,
            tsi: 0,
            has_tsf: false,
            tsf: 0,
            has_trailer: false,
            sob: false,
            eob: false,
        }
    }
}

/// Cursor writing big-endian words into a byte buffer.
struct WordWriter<'a> {
    buf: &'a mut [u8],
    words: usize,
}

impl<'a> WordWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, words: 0 }
    }

    fn put_u32(&mut self, v: u32) {
        let at = self.words * 4;
        self.buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
        self.words += 1;
    }

    /// Reserve word 0; it is written last, once the header length is known.
    fn skip_word0(&mut self) {
        self.words = 1;
    }
}

/// Cursor reading big-endian words from a byte buffer.
struct WordReader<'a> {
    buf: &'a [u8],
    words: usize,
}

impl<'a> WordReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, words: 0 }
    }

    fn take_u32(&mut self) -> Result<u32, HeaderError> {
        let at = self.words * 4;
        if at + 4 > self.buf.len() {
            return Err(HeaderError::Truncated);
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[at..at + 4]);
        self.words += 1;
        Ok(u32::from_be_bytes(arr))
    }

    fn skip(&mut self, words: usize) {
        self.words += words;
    }
}

/// Packs `info` as a big-endian header at the front of `packet`.
///
/// The stream id is always emitted; a class id never is. Word counts are
/// written back into `info`: the total packet size accounts for the payload
/// and, when `has_trailer` is set, one trailer word (the trailer itself is
/// the caller's to write after the payload).
///
/// Returns the number of header words written.
///
/// # Panics
///
/// Panics if `packet` cannot hold [`MAX_IF_HDR_WORDS32`] words; callers
/// size frames well above that.
pub fn hdr_pack_be(packet: &mut [u8], info: &mut IfPacketInfo) -> usize {
    let mut w = WordWriter::new(&mut packet[..MAX_IF_HDR_WORDS32 * 4]);
    w.skip_word0();
    w.put_u32(info.stream_id);
    if info.has_tsi {
        w.put_u32(info.tsi);
    }
    if info.has_tsf {
        w.put_u32((info.tsf >> 32) as u32);
        w.put_u32(info.tsf as u32);
    }

    info.num_header_words32 = w.words;
    info.num_packet_words32 =
        info.num_header_words32 + info.num_payload_words32 + usize::from(info.has_trailer);

    let type_tag = match info.packet_type {
        PacketType::Data => TYPE_DATA,
        PacketType::IfContext => TYPE_IF_CONTEXT,
        PacketType::ExtContext => TYPE_EXT_CONTEXT,
    };

    let mut word0 = 0u32;
    word0 |= type_tag << 29;
    word0 |= 1 << 28; // stream id always present
    word0 |= u32::from(info.has_trailer) << 26;
    word0 |= u32::from(info.sob) << 25;
    word0 |= u32::from(info.eob) << 24;
    if info.has_tsi {
        word0 |= 0x3 << 22;
    }
    if info.has_tsf {
        word0 |= 0x1 << 20;
    }
    word0 |= u32::from(info.packet_count & 0xf) << 16;
    word0 |= (info.num_packet_words32 as u32) & 0xffff;

    packet[0..4].copy_from_slice(&word0.to_be_bytes());
    info.num_header_words32
}

/// Unpacks a big-endian header from the front of `packet`.
///
/// `packet` is the full datagram; its length fixes the total word count
/// against which the advertised header length is validated.
///
/// # Errors
///
/// - [`HeaderError::Truncated`] if the datagram is shorter than its header
/// - [`HeaderError::UnknownPacketType`] for a type tag this device never emits
/// - [`HeaderError::LengthMismatch`] if header plus trailer overrun the packet
pub fn hdr_unpack_be(packet: &[u8]) -> Result<IfPacketInfo, HeaderError> {
    let num_packet_words32 = packet.len() / 4;
    let mut r = WordReader::new(packet);
    let word0 = r.take_u32()?;

    let packet_type = match (word0 >> 29) & 0x7 {
        TYPE_DATA => PacketType::Data,
        TYPE_IF_CONTEXT => PacketType::IfContext,
        TYPE_EXT_CONTEXT => PacketType::ExtContext,
        other => return Err(HeaderError::UnknownPacketType(other)),
    };

    let has_sid = (word0 >> 28) & 0x1 != 0;
    let has_cid = (word0 >> 27) & 0x1 != 0;
    let has_trailer = (word0 >> 26) & 0x1 != 0;
    let sob = (word0 >> 25) & 0x1 != 0;
    let eob = (word0 >> 24) & 0x1 != 0;
    let has_tsi = (word0 >> 22) & 0x3 != 0;
    let has_tsf = (word0 >> 20) & 0x3 != 0;
    let packet_count = ((word0 >> 16) & 0xf) as u8;

    let mut info = IfPacketInfo {
        packet_type,
        packet_count,
        has_trailer,
        sob,
        eob,
        has_tsi,
        has_tsf,
        ..IfPacketInfo::default()
    };

    if has_sid {
        info.stream_id = r.take_u32()?;
    }
    if has_cid {
        r.skip(2); // class id carried by other implementations, ignored
    }
    if has_tsi {
        info.tsi = r.take_u32()?;
    }
    if has_tsf {
        let hi = r.take_u32()?;
        let lo = r.take_u32()?;
        info.tsf = (u64::from(hi) << 32) | u64::from(lo);
    }

    info.num_header_words32 = r.words;
    info.num_packet_words32 = num_packet_words32;

    let non_payload = info.num_header_words32 + usize::from(has_trailer);
    if non_payload > num_packet_words32 {
        return Err(HeaderError::LengthMismatch {
            header: non_payload,
            packet: num_packet_words32,
        });
    }
    info.num_payload_words32 = num_packet_words32 - non_payload;
    Ok(info)
}
