//! Time sources. The registry never reads the system clock directly so lock
//! expiry and reset scheduling can be driven deterministically in tests.

use std::sync::Mutex;

use chrono::{
    DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, TimeZone, Utc,
};

pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current local calendar time.
    fn local_now(&self) -> NaiveDateTime;

    /// Convert a local calendar time back to an instant. Ambiguous times resolve to
    /// the earlier instant; times skipped by a DST jump move forward one hour.
    fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc>;
}

/// Wall clock in the host's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match Local.from_local_datetime(&local) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => Local
                .from_local_datetime(&(local + Duration::hours(1)))
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
        }
    }
}

/// Settable clock with a fixed UTC offset.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_offset(now, Utc.fix())
    }

    pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Start at the given local calendar time.
    pub fn at_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
        let utc = Utc.from_utc_datetime(&(local - shift));
        Self::with_offset(utc, offset)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        self.set(self.local_to_utc(local));
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&self.offset).naive_local()
    }

    fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&(local - shift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn local(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("valid time")
    }

    #[test]
    fn manual_clock_converts_with_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
        let clock = ManualClock::at_local(local(10, 30), offset);
        assert_eq!(clock.local_now(), local(10, 30));
        assert_eq!(clock.now().naive_utc(), local(8, 30));
        assert_eq!(clock.local_to_utc(local(9, 0)).naive_utc(), local(7, 0));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_local(local(8, 0), FixedOffset::east_opt(0).expect("offset"));
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.local_now(), local(9, 30));
        clock.set_local(local(12, 0));
        assert_eq!(clock.local_now(), local(12, 0));
    }
}
