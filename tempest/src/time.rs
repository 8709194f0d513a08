//! Device time representation.
//!
//! A [`TimeSpec`] is the pair (integer seconds, fractional ticks) stamped by
//! the device's fixed-rate clock, plus the tick rate needed to interpret the
//! fractional part. Equality and ordering are exact on the integer pair;
//! the tick rate never participates in a comparison, so two specs from the
//! same clock align bit-for-bit with no floating-point fuzz.

use std::cmp::Ordering;
use std::time::Duration;

/// A point in device time: whole seconds plus fractional clock ticks.
#[derive(Debug, Clone, Copy)]
pub struct TimeSpec {
    full_secs: i64,
    frac_ticks: u64,
    tick_rate: f64,
}

impl TimeSpec {
    /// Creates a time spec from whole seconds and fractional ticks.
    #[must_use]
    pub const fn new(full_secs: i64, frac_ticks: u64, tick_rate: f64) -> Self {
        Self {
            full_secs,
            frac_ticks,
            tick_rate,
        }
    }

    /// Creates a time spec from the integer-second and fractional-tick
    /// fields of a decoded packet header.
    #[must_use]
    pub const fn from_packet(tsi: u32, tsf: u64, tick_rate: f64) -> Self {
        Self::new(tsi as i64, tsf, tick_rate)
    }

    /// Whole seconds.
    #[must_use]
    pub const fn full_secs(&self) -> i64 {
        self.full_secs
    }

    /// Fractional ticks within the current second.
    #[must_use]
    pub const fn frac_ticks(&self) -> u64 {
        self.frac_ticks
    }

    /// Clock rate the fractional ticks are counted at, in Hz.
    #[must_use]
    pub const fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    /// Total time as floating-point seconds. For display and coarse
    /// arithmetic only; never used for alignment.
    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.full_secs as f64 + self.frac_ticks as f64 / self.tick_rate
    }

    /// Fractional part converted to a tick count at `rate`.
    ///
    /// Identity when `rate` equals the spec's own tick rate; otherwise the
    /// count is rescaled and rounded.
    #[must_use]
    pub fn tick_count(&self, rate: f64) -> u32 {
        if (rate - self.tick_rate).abs() < f64::EPSILON {
            return self.frac_ticks as u32;
        }
        (self.frac_ticks as f64 * rate / self.tick_rate).round() as u32
    }
}

impl PartialEq for TimeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.full_secs == other.full_secs && self.frac_ticks == other.frac_ticks
    }
}

impl Eq for TimeSpec {}

impl PartialOrd for TimeSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.full_secs, self.frac_ticks).cmp(&(other.full_secs, other.frac_ticks))
    }
}

impl std::fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}t", self.full_secs, self.frac_ticks)
    }
}

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl Timeout {
    /// Convenience constructor from fractional seconds.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::Duration(Duration::from_secs_f64(secs))
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Tracks the remaining budget of a [`Timeout`] across several waits.
///
/// Each call to [`Deadline::remaining`] returns how long the caller may
/// still block, or `None` once the budget is spent. An `Infinite` timeout
/// never expires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    expires: Option<minstant::Instant>,
}

impl Deadline {
    /// Durations at or beyond this are treated as infinite; it also keeps
    /// the instant arithmetic below from overflowing.
    const FOREVER: Duration = Duration::from_secs(365 * 24 * 3600);

    pub(crate) fn new(timeout: Timeout) -> Self {
        let expires = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) if d >= Self::FOREVER => None,
            Timeout::Duration(d) => Some(minstant::Instant::now() + d),
        };
        Self { expires }
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        match self.expires {
            None => Some(Duration::MAX),
            Some(at) => {
                let now = minstant::Instant::now();
                if now >= at { None } else { Some(at - now) }
            }
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.remaining().is_none()
    }
}
