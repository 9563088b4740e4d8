//! Millisecond time types for the protocol.
//!
//! All entry points take the current time explicitly instead of reading a
//! platform clock, which keeps the protocol deterministic under simulation.

use core::ops::{Add, AddAssign, Mul, Sub};

/// A point in time, in milliseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch itself.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    /// Create a timestamp from seconds.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// The low 24 bits of the millisecond count, as used by the
    /// addressing handshake.
    #[inline]
    pub const fn low_24_bits(self) -> u32 {
        (self.0 & 0x00FF_FFFF) as u32
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    #[inline]
    pub const fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

/// A span of time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    /// Zero-length span.
    pub const ZERO: Duration = Duration(0);

    /// Create a duration from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Duration(ms)
    }

    /// Create a duration from seconds.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    /// The span as milliseconds.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u64> for Duration {
    type Output = Duration;

    #[inline]
    fn mul(self, rhs: u64) -> Duration {
        Duration(self.0.saturating_mul(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_secs(10);
        assert_eq!((t + Duration::from_millis(500)).as_millis(), 10_500);
        assert_eq!(Timestamp::from_secs(12) - t, Duration::from_secs(2));
        assert_eq!(t.saturating_since(Timestamp::from_secs(15)), Duration::ZERO);
    }

    #[test]
    fn duration_scaling() {
        assert_eq!((Duration::from_secs(3) * 5).as_millis(), 15_000);
    }

    #[test]
    fn low_bits_wrap() {
        let t = Timestamp::from_millis(0x0123_4567_89AB);
        assert_eq!(t.low_24_bits(), 0x0067_89AB);
    }
}
