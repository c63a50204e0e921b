use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SimError, SimResult};

/// One tick is one picosecond.
pub const TICKS_PER_NS: u64 = 1_000;
pub const TICKS_PER_US: u64 = 1_000 * TICKS_PER_NS;
pub const TICKS_PER_MS: u64 = 1_000 * TICKS_PER_US;

/// Absolute simulated time, counted in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn from_ticks(ticks: u64) -> Self {
        Timestamp(ticks)
    }

    pub const fn from_nanos(ns: u64) -> Self {
        Timestamp(ns * TICKS_PER_NS)
    }

    pub const fn from_micros(us: u64) -> Self {
        Timestamp(us * TICKS_PER_US)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms * TICKS_PER_MS)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// `self + delay`. Negative delays would move time backwards and are
    /// rejected, as is overflow past `Timestamp::MAX`.
    pub fn add_delay(self, delay: TimeDelta) -> SimResult<Timestamp> {
        if delay.is_negative() {
            return Err(SimError::InvalidDelay { delay });
        }
        self.0
            .checked_add(delay.0 as u64)
            .map(Timestamp)
            .ok_or(SimError::InvalidDelay { delay })
    }

    /// Addition used for horizon arithmetic, where running past the end of
    /// time just means "never".
    pub(crate) fn saturating_add_ticks(self, ticks: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(ticks))
    }

    pub fn min(self, other: Timestamp) -> Timestamp {
        Ord::min(self, other)
    }

    pub fn max(self, other: Timestamp) -> Timestamp {
        Ord::max(self, other)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == u64::MAX {
            return write!(f, "T=inf");
        }
        if self.0 % TICKS_PER_US == 0 {
            write!(f, "T={}us", self.0 / TICKS_PER_US)
        } else if self.0 % TICKS_PER_NS == 0 {
            write!(f, "T={}ns", self.0 / TICKS_PER_NS)
        } else {
            write!(f, "T={}ps", self.0)
        }
    }
}

/// A signed span of simulated time. Signed so that a malformed negative
/// delay reaches `Timestamp::add_delay` and is reported instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const ZERO: TimeDelta = TimeDelta(0);

    pub const fn from_ticks(ticks: i64) -> Self {
        TimeDelta(ticks)
    }

    pub const fn from_nanos(ns: i64) -> Self {
        TimeDelta(ns * TICKS_PER_NS as i64)
    }

    pub const fn from_micros(us: i64) -> Self {
        TimeDelta(us * TICKS_PER_US as i64)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ps", self.0)
    }
}
