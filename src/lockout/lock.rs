use chrono::{DateTime, Utc};

use crate::lockout::catalog::MapDifficultyEntries;
use crate::lockout::data::LockData;
use crate::lockout::schedule::ResetScheduler;

/// Where a lock's payload lives.
#[derive(Debug)]
pub enum LockDataHandle {
    /// Owned by this lock alone.
    Exclusive(LockData),
    /// Slot in the registry's shared table, keyed by instance id.
    Shared { instance_id: u32 },
}

/// A player's save to one map/difficulty until the next scheduled reset.
///
/// Locks are deliberately not `Clone`: a shared-mode lock stands for one counted
/// reference to its instance's progress record.
#[derive(Debug)]
pub struct InstanceLock {
    map_id: u32,
    difficulty_id: u8,
    instance_id: u32,
    expiry_time: DateTime<Utc>,
    extended: bool,
    data: LockDataHandle,
}

impl InstanceLock {
    /// A lock owning its own payload.
    pub fn new(
        map_id: u32,
        difficulty_id: u8,
        expiry_time: DateTime<Utc>,
        instance_id: u32,
        data: LockData,
    ) -> Self {
        Self {
            map_id,
            difficulty_id,
            instance_id,
            expiry_time,
            extended: false,
            data: LockDataHandle::Exclusive(data),
        }
    }

    /// Callers must already hold a reference on the shared slot for this lock.
    pub(crate) fn new_shared(
        map_id: u32,
        difficulty_id: u8,
        expiry_time: DateTime<Utc>,
        instance_id: u32,
        shared_instance_id: u32,
    ) -> Self {
        Self {
            map_id,
            difficulty_id,
            instance_id,
            expiry_time,
            extended: false,
            data: LockDataHandle::Shared {
                instance_id: shared_instance_id,
            },
        }
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn difficulty_id(&self) -> u8 {
        self.difficulty_id
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub(crate) fn set_instance_id(&mut self, instance_id: u32) {
        self.instance_id = instance_id;
    }

    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_time
    }

    pub(crate) fn set_expiry_time(&mut self, expiry_time: DateTime<Utc>) {
        self.expiry_time = expiry_time;
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub(crate) fn set_extended(&mut self, extended: bool) {
        self.extended = extended;
    }

    pub fn data_handle(&self) -> &LockDataHandle {
        &self.data
    }

    pub(crate) fn data_handle_mut(&mut self) -> &mut LockDataHandle {
        &mut self.data
    }

    /// Instance id of the shared progress record, if this lock uses one.
    pub fn shared_instance_id(&self) -> Option<u32> {
        match self.data {
            LockDataHandle::Shared { instance_id } => Some(instance_id),
            LockDataHandle::Exclusive(_) => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_time
    }

    /// Expired locks only count while extended.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) || self.extended
    }

    /// When the player actually loses this lock.
    ///
    /// An extended lock survives one reset: before its stored expiry it runs one
    /// extra reset period, after it the lock follows the live reset calendar.
    pub fn effective_expiry_time(
        &self,
        entries: &MapDifficultyEntries<'_>,
        scheduler: &ResetScheduler,
    ) -> DateTime<Utc> {
        if !self.extended {
            return self.expiry_time;
        }

        if self.is_expired(scheduler.now()) {
            return scheduler.next_reset_time(entries);
        }

        self.expiry_time + entries.raid_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResetScheduleConfig;
    use crate::lockout::catalog::{MapDifficultyEntry, MapEntry};
    use crate::lockout::clock::ManualClock;
    use crate::lockout::types::ResetInterval;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::Arc;

    fn map() -> MapEntry {
        MapEntry {
            id: 631,
            name: "Icecrown Citadel".into(),
            flex_locking: false,
        }
    }

    fn weekly() -> MapDifficultyEntry {
        MapDifficultyEntry {
            map_id: 631,
            difficulty_id: 3,
            lock_id: 0,
            name: "10 Player".into(),
            reset_interval: ResetInterval::Weekly,
            encounter_locks: false,
        }
    }

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        let naive = NaiveDate::from_ymd_opt(2024, 1, d)
            .and_then(|date| date.and_hms_opt(h, 0, 0))
            .expect("valid date");
        Utc.from_utc_datetime(&naive)
    }

    fn scheduler_at(now: DateTime<Utc>) -> ResetScheduler {
        ResetScheduler::new(ResetScheduleConfig::default(), Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn not_extended_uses_stored_expiry() {
        let (map, difficulty) = (map(), weekly());
        let entries = MapDifficultyEntries::new(&map, &difficulty);
        let lock = InstanceLock::new(631, 3, utc(2, 9), 5, LockData::default());
        let scheduler = scheduler_at(utc(1, 10));
        assert_eq!(lock.effective_expiry_time(&entries, &scheduler), utc(2, 9));
        // Even once expired
        let later = scheduler_at(utc(20, 10));
        assert_eq!(lock.effective_expiry_time(&entries, &later), utc(2, 9));
    }

    #[test]
    fn extended_and_active_adds_one_period() {
        let (map, difficulty) = (map(), weekly());
        let entries = MapDifficultyEntries::new(&map, &difficulty);
        let mut lock = InstanceLock::new(631, 3, utc(2, 9), 5, LockData::default());
        lock.set_extended(true);
        let scheduler = scheduler_at(utc(1, 10));
        assert_eq!(
            lock.effective_expiry_time(&entries, &scheduler),
            utc(2, 9) + Duration::days(7)
        );
    }

    #[test]
    fn extended_and_expired_follows_calendar() {
        let (map, difficulty) = (map(), weekly());
        let entries = MapDifficultyEntries::new(&map, &difficulty);
        let mut lock = InstanceLock::new(631, 3, utc(2, 9), 5, LockData::default());
        lock.set_extended(true);
        // Wednesday 2024-01-10 -> next Tuesday 2024-01-16 09:00
        let scheduler = scheduler_at(utc(10, 12));
        assert_eq!(lock.effective_expiry_time(&entries, &scheduler), utc(16, 9));
        assert_eq!(
            lock.effective_expiry_time(&entries, &scheduler),
            scheduler.next_reset_time(&entries)
        );
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let lock = InstanceLock::new(631, 3, utc(2, 9), 0, LockData::default());
        assert!(!lock.is_expired(utc(2, 8)));
        assert!(lock.is_expired(utc(2, 9)));
        assert!(!lock.is_active(utc(2, 9)));
    }
}
