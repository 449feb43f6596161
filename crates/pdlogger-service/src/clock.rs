//! Wall-clock access.
//!
//! Time-window exports need "now" in Unix seconds, but only once the clock
//! has been synchronized. A clock reading below
//! [`MIN_PLAUSIBLE_EPOCH`](pdlogger_types::MIN_PLAUSIBLE_EPOCH) is reported
//! as unknown.

use pdlogger_types::plausible_epoch;
use time::OffsetDateTime;

/// Source of the current wall-clock time.
pub trait WallClock: Send + Sync {
    /// Current Unix time in seconds, or `None` while the clock is unsynced.
    fn now_epoch(&self) -> Option<i64>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_epoch(&self) -> Option<i64> {
        plausible_epoch(OffsetDateTime::now_utc().unix_timestamp())
    }
}

/// A clock frozen at a fixed reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock(pub Option<i64>);

impl WallClock for FixedClock {
    fn now_epoch(&self) -> Option<i64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_synced() {
        let now = SystemClock.now_epoch().unwrap();
        assert!(now > 1_600_000_000);
    }

    #[test]
    fn test_fixed_clock() {
        assert_eq!(FixedClock(Some(1000)).now_epoch(), Some(1000));
        assert_eq!(FixedClock(None).now_epoch(), None);
    }
}
