use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

/// Milliseconds on the process-local monotonic clock.
///
/// Only meaningful within one process lifetime. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonoMs(pub u64);

impl MonoMs {
    pub fn elapsed_since(self, earlier: MonoMs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn plus(self, ms: u64) -> MonoMs {
        MonoMs(self.0.saturating_add(ms))
    }
}

/// Wall-clock seconds since the unix epoch; the only timestamp that is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTime(pub i64);

impl UnixTime {
    pub const UNSET: UnixTime = UnixTime(0);

    pub fn is_set(self) -> bool {
        self.0 > 0
    }

    /// Seconds from `earlier` to `self`, or `None` when the clock went backwards.
    pub fn secs_since(self, earlier: UnixTime) -> Option<u64> {
        self.0
            .checked_sub(earlier.0)
            .and_then(|delta| u64::try_from(delta).ok())
    }

    /// True once at least `ms` have passed since `earlier`.
    ///
    /// A negative elapsed time counts as elapsed, so a skewed clock can only
    /// shorten a running cycle.
    pub fn has_elapsed(self, earlier: UnixTime, ms: u64) -> bool {
        self.secs_since(earlier)
            .map_or(true, |secs| secs.saturating_mul(1_000) >= ms)
    }

    pub fn plus_ms(self, ms: u64) -> UnixTime {
        let secs = i64::try_from(ms / 1_000).unwrap_or(i64::MAX);
        UnixTime(self.0.saturating_add(secs))
    }
}

/// Local wall-clock fields in the configured timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Calendar day ordinal (days since 0001-01-01), used for rollover detection.
    pub day: i32,
}

impl LocalClock {
    pub fn from_datetime(now: &DateTime<FixedOffset>) -> Self {
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            day: now.num_days_from_ce(),
        }
    }

    pub fn minute_of_day(&self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }

    pub fn seconds_of_day(&self) -> u32 {
        self.minute_of_day() * 60 + u32::from(self.second)
    }

    /// `start <= hour < end`. An empty or inverted range never matches.
    pub fn in_hours(&self, start: u8, end: u8) -> bool {
        self.hour >= start && self.hour < end
    }
}

/// One instant seen through both clocks, captured once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTime {
    pub mono: MonoMs,
    pub unix: UnixTime,
    pub local: LocalClock,
}

impl TickTime {
    pub fn new(mono: MonoMs, now: &DateTime<FixedOffset>) -> Self {
        Self {
            mono,
            unix: UnixTime(now.timestamp()),
            local: LocalClock::from_datetime(now),
        }
    }

    /// Unix time of local midnight for the current day.
    pub fn start_of_day(&self) -> UnixTime {
        UnixTime(self.unix.0 - i64::from(self.local.seconds_of_day()))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::tick_at;
    use super::*;

    #[test]
    fn backwards_clock_counts_as_elapsed() {
        let later = UnixTime(1_000);
        let earlier = UnixTime(2_000);
        assert_eq!(later.secs_since(earlier), None);
        assert!(later.has_elapsed(earlier, 3_600_000));
    }

    #[test]
    fn elapsed_uses_millisecond_threshold() {
        let start = UnixTime(1_000);
        assert!(!UnixTime(1_029).has_elapsed(start, 30_000));
        assert!(UnixTime(1_030).has_elapsed(start, 30_000));
    }

    #[test]
    fn local_clock_fields() {
        let tick = tick_at(0, 6, 30, 15);
        assert_eq!(tick.local.hour, 6);
        assert_eq!(tick.local.minute_of_day(), 390);
        assert_eq!(tick.local.seconds_of_day(), 390 * 60 + 15);
        assert!(tick.local.in_hours(6, 12));
        assert!(!tick.local.in_hours(12, 18));
        assert_eq!(tick.start_of_day().0, tick.unix.0 - 23_415);
    }

    #[test]
    fn monotonic_saturates() {
        assert_eq!(MonoMs(5).elapsed_since(MonoMs(10)), 0);
        assert_eq!(MonoMs(u64::MAX).plus(10), MonoMs(u64::MAX));
    }
}
