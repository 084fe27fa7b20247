// SPDX-License-Identifier: MPL-2.0

//! Nanosecond time values and the kernel clocks.

use core::ops::{Add, AddAssign, Sub, SubAssign};

use pados_frame::sync::SpinLock;

/// A point in time or a duration, in nanoseconds.
///
/// `INFINITE` is the sentinel for "no deadline"; arithmetic saturates so an
/// infinite deadline stays infinite.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeValNanos(i64);

impl TimeValNanos {
    pub const INFINITE: TimeValNanos = TimeValNanos(i64::MAX);

    pub const fn zero() -> Self {
        TimeValNanos(0)
    }

    pub const fn from_nanos(ns: i64) -> Self {
        TimeValNanos(ns)
    }

    pub const fn from_micros(us: i64) -> Self {
        TimeValNanos(us * 1_000)
    }

    pub const fn from_millis(ms: i64) -> Self {
        TimeValNanos(ms * 1_000_000)
    }

    pub const fn from_secs(s: i64) -> Self {
        TimeValNanos(s * 1_000_000_000)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub const fn as_secs(self) -> i64 {
        self.0 / 1_000_000_000
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == i64::MAX
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for TimeValNanos {
    type Output = TimeValNanos;

    fn add(self, rhs: TimeValNanos) -> TimeValNanos {
        TimeValNanos(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeValNanos {
    type Output = TimeValNanos;

    fn sub(self, rhs: TimeValNanos) -> TimeValNanos {
        if self.is_infinite() {
            self
        } else {
            TimeValNanos(self.0.saturating_sub(rhs.0))
        }
    }
}

impl AddAssign for TimeValNanos {
    fn add_assign(&mut self, rhs: TimeValNanos) {
        *self = *self + rhs;
    }
}

impl SubAssign for TimeValNanos {
    fn sub_assign(&mut self, rhs: TimeValNanos) {
        *self = *self - rhs;
    }
}

/// The clocks a deadline may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    /// Time since boot; never jumps.
    Monotonic,
    /// Wall-clock time; jumps when the offset is set.
    RealTime,
}

static REAL_TIME_OFFSET: SpinLock<i64> = SpinLock::new(0);

/// Time since boot.
pub fn get_monotonic_time() -> TimeValNanos {
    TimeValNanos(pados_frame::time::monotonic_ns())
}

/// Wall-clock time: the monotonic clock plus the real-time offset.
pub fn get_real_time() -> TimeValNanos {
    get_monotonic_time() + TimeValNanos(*REAL_TIME_OFFSET.lock())
}

/// Set the wall clock. Only the offset moves; the monotonic clock is
/// unaffected.
pub fn set_real_time(now: TimeValNanos) {
    *REAL_TIME_OFFSET.lock() = now.nanos() - get_monotonic_time().nanos();
}

pub fn get_clock_time(clock: ClockId) -> TimeValNanos {
    match clock {
        ClockId::Monotonic => get_monotonic_time(),
        ClockId::RealTime => get_real_time(),
    }
}

/// Convert a timeout into an absolute monotonic deadline.
pub fn deadline_after(timeout: TimeValNanos) -> TimeValNanos {
    if timeout.is_infinite() {
        TimeValNanos::INFINITE
    } else {
        get_monotonic_time() + timeout
    }
}

/// Convert a deadline on `clock` into a monotonic deadline.
pub(crate) fn monotonic_deadline(deadline: TimeValNanos, clock: ClockId) -> TimeValNanos {
    if deadline.is_infinite() {
        return TimeValNanos::INFINITE;
    }
    match clock {
        ClockId::Monotonic => deadline,
        ClockId::RealTime => deadline - TimeValNanos(*REAL_TIME_OFFSET.lock()),
    }
}
