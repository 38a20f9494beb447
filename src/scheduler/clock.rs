use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use parking_lot::Mutex;

/// Source of wall-clock time for time updates.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        if let Some(next) = now.checked_add_signed(by) {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// Time left until the next whole wall-clock second. A time exactly on a
/// second boundary waits a full second.
pub fn delay_until_whole_second(now: &DateTime<Local>) -> Duration {
    // `nanosecond()` runs past 1e9 during a leap second.
    let nanos = u64::from(now.nanosecond() % 1_000_000_000);
    Duration::from_nanos(1_000_000_000 - nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(millis: i64) -> DateTime<Local> {
        Local.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
    }

    #[test]
    fn delay_reaches_next_second() {
        assert_eq!(delay_until_whole_second(&at(250)), Duration::from_millis(750));
        assert_eq!(delay_until_whole_second(&at(999)), Duration::from_millis(1));
        assert_eq!(delay_until_whole_second(&at(0)), Duration::from_millis(1000));
    }

    #[test]
    fn delay_keeps_sub_millisecond_precision() {
        let at_nanos = |nanos| {
            Local
                .timestamp_opt(1_700_000_000, nanos)
                .single()
                .expect("timestamp should be unambiguous")
        };

        let delay = delay_until_whole_second(&at_nanos(137_900_000));
        assert_eq!(delay, Duration::from_nanos(862_100_000));
        let delay = delay_until_whole_second(&at_nanos(999_999_999));
        assert_eq!(delay, Duration::from_nanos(1));
    }

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new(at(0));
        assert_eq!(clock.now(), at(0));
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), at(1500));
        clock.set(at(10));
        assert_eq!(clock.now(), at(10));
    }
}
