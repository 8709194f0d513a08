//! Per-call metadata exchanged with the user.

use crate::time::TimeSpec;
use crate::vrt::EventCode;

/// Non-fatal receive conditions reported alongside the sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxErrorCode {
    /// No aligned packet set arrived within the deadline.
    Timeout,
    /// A packet failed header validation in the foreground.
    BadPacket,
}

/// Metadata filled by [`recv`](crate::stream::StreamIo::recv).
///
/// Fields describe the first packet consumed by the call; continuation
/// segments never overwrite them.
#[derive(Debug, Clone, Copy)]
pub struct RxMetadata {
    pub has_time_spec: bool,
    pub time_spec: TimeSpec,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    pub error: Option<RxErrorCode>,
}

impl Default for RxMetadata {
    fn default() -> Self {
        Self {
            has_time_spec: false,
            time_spec: TimeSpec::new(0, 0, 1.0),
            start_of_burst: false,
            end_of_burst: false,
            error: None,
        }
    }
}

/// Metadata supplied to [`send`](crate::stream::StreamIo::send).
///
/// Burst flags apply to the call as a whole: the first packet of a
/// fragmented send carries `start_of_burst` (and the time spec, when
/// present), the last carries `end_of_burst`.
#[derive(Debug, Clone, Copy)]
pub struct TxMetadata {
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    pub has_time_spec: bool,
    pub time_spec: TimeSpec,
}

impl Default for TxMetadata {
    fn default() -> Self {
        Self {
            start_of_burst: false,
            end_of_burst: false,
            has_time_spec: false,
            time_spec: TimeSpec::new(0, 0, 1.0),
        }
    }
}

impl TxMetadata {
    /// A complete single-call burst transmitted at `time`.
    #[must_use]
    pub fn burst_at(time: TimeSpec) -> Self {
        Self {
            start_of_burst: true,
            end_of_burst: true,
            has_time_spec: true,
            time_spec: time,
        }
    }
}

/// A TX async status report, delivered out of band.
#[derive(Debug, Clone, Copy)]
pub struct AsyncMetadata {
    /// Channel (data transport index) the report arrived on.
    pub channel: usize,
    /// Event bitset from the context payload.
    pub event_code: EventCode,
    /// Device time of the event, when the report carried both timestamp
    /// fields.
    pub time_spec: Option<TimeSpec>,
}
