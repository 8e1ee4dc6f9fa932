//! Reset calendar. Scheduled resets always land on the hour, either every day at
//! the configured hour or once a week on the configured weekday.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc};

use crate::config::ResetScheduleConfig;
use crate::lockout::catalog::MapDifficultyEntries;
use crate::lockout::clock::Clock;
use crate::lockout::types::ResetInterval;

/// Next reset boundary after `now` for the given interval, in local calendar time.
///
/// Without a reset interval there is no next boundary; the current time truncated
/// to the hour is returned.
pub fn next_reset_time(
    now: NaiveDateTime,
    interval: ResetInterval,
    schedule: &ResetScheduleConfig,
) -> NaiveDateTime {
    let midnight = now.date().and_time(chrono::NaiveTime::MIN);
    let current_hour = now.hour();
    let reset_hour = Duration::hours(i64::from(schedule.daily_hour));

    match interval {
        ResetInterval::Daily => {
            let days = if current_hour >= schedule.daily_hour { 1 } else { 0 };
            midnight + Duration::days(days) + reset_hour
        }
        ResetInterval::Weekly => {
            let weekday = i64::from(now.weekday().num_days_from_sunday());
            let reset_day = i64::from(schedule.weekly_day);
            let mut days = reset_day - weekday;
            // Passed it for the current week
            if weekday > reset_day || (weekday == reset_day && current_hour >= schedule.daily_hour) {
                days += 7;
            }
            midnight + Duration::days(days) + reset_hour
        }
        ResetInterval::None => midnight + Duration::hours(i64::from(current_hour)),
    }
}

/// Binds the reset calendar to a clock so lock code can ask "when is the next reset".
#[derive(Clone)]
pub struct ResetScheduler {
    config: ResetScheduleConfig,
    clock: Arc<dyn Clock>,
}

impl ResetScheduler {
    pub fn new(config: ResetScheduleConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn next_reset_time(&self, entries: &MapDifficultyEntries<'_>) -> DateTime<Utc> {
        self.next_reset_for_interval(entries.map_difficulty.reset_interval)
    }

    pub fn next_reset_for_interval(&self, interval: ResetInterval) -> DateTime<Utc> {
        let local = next_reset_time(self.clock.local_now(), interval, &self.config);
        self.clock.local_to_utc(local)
    }
}

impl std::fmt::Debug for ResetScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockout::clock::ManualClock;
    use chrono::{FixedOffset, NaiveDate};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .expect("valid date")
    }

    fn schedule() -> ResetScheduleConfig {
        ResetScheduleConfig::default()
    }

    #[test]
    fn daily_before_reset_hour_is_today() {
        let next = next_reset_time(at(2024, 1, 1, 8, 59), ResetInterval::Daily, &schedule());
        assert_eq!(next, at(2024, 1, 1, 9, 0));
    }

    #[test]
    fn daily_after_reset_hour_is_tomorrow() {
        let next = next_reset_time(at(2024, 1, 1, 9, 1), ResetInterval::Daily, &schedule());
        assert_eq!(next, at(2024, 1, 2, 9, 0));
        let exact = next_reset_time(at(2024, 1, 1, 9, 0), ResetInterval::Daily, &schedule());
        assert_eq!(exact, at(2024, 1, 2, 9, 0));
    }

    #[test]
    fn daily_rolls_over_month_end() {
        let next = next_reset_time(at(2024, 2, 29, 23, 30), ResetInterval::Daily, &schedule());
        assert_eq!(next, at(2024, 3, 1, 9, 0));
    }

    #[test]
    fn weekly_monday_resets_next_day() {
        // 2024-01-01 is a Monday
        let next = next_reset_time(at(2024, 1, 1, 10, 0), ResetInterval::Weekly, &schedule());
        assert_eq!(next, at(2024, 1, 2, 9, 0));
    }

    #[test]
    fn weekly_after_reset_on_reset_day_is_next_week() {
        let next = next_reset_time(at(2024, 1, 2, 9, 1), ResetInterval::Weekly, &schedule());
        assert_eq!(next, at(2024, 1, 9, 9, 0));
    }

    #[test]
    fn weekly_before_reset_on_reset_day_is_today() {
        let next = next_reset_time(at(2024, 1, 2, 8, 15), ResetInterval::Weekly, &schedule());
        assert_eq!(next, at(2024, 1, 2, 9, 0));
    }

    #[test]
    fn weekly_later_in_week_wraps() {
        // Saturday
        let next = next_reset_time(at(2024, 1, 6, 12, 0), ResetInterval::Weekly, &schedule());
        assert_eq!(next, at(2024, 1, 9, 9, 0));
    }

    #[test]
    fn custom_schedule_is_honored() {
        let custom = ResetScheduleConfig {
            daily_hour: 4,
            weekly_day: 3,
        };
        let next = next_reset_time(at(2024, 1, 1, 3, 0), ResetInterval::Weekly, &custom);
        assert_eq!(next, at(2024, 1, 3, 4, 0));
        let daily = next_reset_time(at(2024, 1, 1, 5, 0), ResetInterval::Daily, &custom);
        assert_eq!(daily, at(2024, 1, 2, 4, 0));
    }

    #[test]
    fn no_interval_truncates_to_hour() {
        let next = next_reset_time(at(2024, 1, 1, 13, 47), ResetInterval::None, &schedule());
        assert_eq!(next, at(2024, 1, 1, 13, 0));
    }

    #[test]
    fn scheduler_converts_local_result_to_utc() {
        let offset = FixedOffset::east_opt(3600).expect("offset");
        let clock = Arc::new(ManualClock::at_local(at(2024, 1, 1, 8, 0), offset));
        let scheduler = ResetScheduler::new(schedule(), clock);
        let next = scheduler.next_reset_for_interval(ResetInterval::Daily);
        assert_eq!(next.naive_utc(), at(2024, 1, 1, 8, 0));
    }
}
