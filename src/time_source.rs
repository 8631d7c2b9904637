//! Clock abstraction shared by the engine, the stores and the logger.
//!
//! The engine never calls `Utc::now()` directly: every timestamp it stamps,
//! compares or schedules against comes from a [`TimeSource`]. Production code
//! uses [`RealTimeSource`]; tests drive a [`ManualTimeSource`] forward by hand
//! so that snooze deadlines and day rollovers can be crossed instantly.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

/// Process-wide clock used where no explicit source is passed (log prefixes).
static TIME_SOURCE: OnceCell<Arc<dyn TimeSource>> = OnceCell::new();

pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Whether this clock is driven by hand rather than by the host.
    fn is_simulated(&self) -> bool;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

/// A clock that only moves when told to.
pub struct ManualTimeSource {
    current: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Start at the given epoch milliseconds.
    pub fn at_millis(millis: i64) -> Self {
        Self::new(Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.lock() = time;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut current = self.lock();
        *current += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid instant
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Install the process-wide clock. Only the first call has any effect.
pub fn init_time_source(source: Arc<dyn TimeSource>) -> bool {
    TIME_SOURCE.set(source).is_ok()
}

pub fn is_initialized() -> bool {
    TIME_SOURCE.get().is_some()
}

/// Current time from the process-wide clock, falling back to the host clock.
pub fn now() -> DateTime<Utc> {
    match TIME_SOURCE.get() {
        Some(source) => source.now(),
        None => Utc::now(),
    }
}

pub fn now_local() -> DateTime<Local> {
    now().with_timezone(&Local)
}

pub fn is_simulated() -> bool {
    TIME_SOURCE
        .get()
        .map(|source| source.is_simulated())
        .unwrap_or(false)
}

/// Convert epoch milliseconds to a UTC instant; `None` when out of range.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Calendar date of `instant` in `timezone`, or in the host's zone when unset.
pub fn local_date(instant: DateTime<Utc>, timezone: Option<Tz>) -> NaiveDate {
    match timezone {
        Some(tz) => instant.with_timezone(&tz).date_naive(),
        None => instant.with_timezone(&Local).date_naive(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_source_advances() {
        let clock = ManualTimeSource::at_millis(1_700_000_000_000);
        assert!(clock.is_simulated());
        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(clock.now_millis(), 1_700_000_300_000);
    }

    #[test]
    fn test_manual_source_set() {
        let clock = ManualTimeSource::at_millis(0);
        let target = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_from_millis_round_trips_ordinary_values() {
        assert_eq!(from_millis(1_234).map(|t| t.timestamp_millis()), Some(1_234));
    }

    #[test]
    fn test_from_millis_rejects_unrepresentable_values() {
        assert_eq!(from_millis(i64::MAX), None);
        assert_eq!(from_millis(i64::MIN), None);
    }

    #[test]
    fn test_local_date_follows_timezone() {
        // 20:00 UTC is already the next day in Bangkok
        let instant = Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap();
        assert_eq!(
            local_date(instant, Some(chrono_tz::Asia::Bangkok)),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
        );
        assert_eq!(
            local_date(instant, Some(chrono_tz::UTC)),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
    }

    #[test]
    fn test_real_source_is_not_simulated() {
        assert!(!RealTimeSource.is_simulated());
    }
}
