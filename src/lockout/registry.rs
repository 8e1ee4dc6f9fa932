//! Instance lock registry.
//!
//! Owns every player's instance locks and the shared progress records of
//! instance-id bound maps. Locks live in one of two tables:
//!
//! * permanent locks, confirmed by player progress and persisted;
//! * temporary locks, created when a player enters a freshly created instance and
//!   promoted to permanent on the first update (usually the first boss kill).
//!
//! Shared records are reference counted by the locks pointing at them. When the
//! last lock lets go, the record is dropped from memory and its persisted row is
//! deleted. The registry is driven from a single update loop and is not
//! internally synchronized.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::lockout::allocator::InstanceIdAllocator;
use crate::lockout::catalog::{DungeonEncounterEntry, MapCatalog, MapDifficultyEntries};
use crate::lockout::data::{LockData, SharedLockTable};
use crate::lockout::errors::LockoutError;
use crate::lockout::lock::{InstanceLock, LockDataHandle};
use crate::lockout::schedule::ResetScheduler;
use crate::lockout::storage::{
    LockStatement, LockStore, LockTransaction, PlayerLockRow, SharedInstanceRow,
};
use crate::lockout::types::{
    AdmissionDecision, LockKey, PlayerGuid, PLAYER_LOCK_SCHEMA_VERSION,
    SHARED_INSTANCE_SCHEMA_VERSION,
};

const LOG_TARGET: &str = "instance.locks";

type PlayerLockMap = HashMap<LockKey, InstanceLock>;
type LockMap = HashMap<PlayerGuid, PlayerLockMap>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockTable {
    Permanent,
    Temporary,
}

/// Progress reported by an instance for one of its players.
#[derive(Debug, Clone, Default)]
pub struct InstanceLockUpdateEvent {
    pub instance_id: u32,
    pub new_data: String,
    /// Encounter completed by this update, if any.
    pub completed_encounter: Option<DungeonEncounterEntry>,
    /// Every encounter the instance itself has completed so far.
    pub instance_completed_encounters_mask: u32,
    pub entrance_location_id: Option<u32>,
}

impl InstanceLockUpdateEvent {
    pub fn new(instance_id: u32, new_data: impl Into<String>) -> Self {
        Self {
            instance_id,
            new_data: new_data.into(),
            ..Default::default()
        }
    }

    pub fn with_completed_encounter(mut self, encounter: DungeonEncounterEntry) -> Self {
        self.completed_encounter = Some(encounter);
        self
    }

    pub fn with_instance_completed_mask(mut self, mask: u32) -> Self {
        self.instance_completed_encounters_mask = mask;
        self
    }

    pub fn with_entrance_location(mut self, location_id: u32) -> Self {
        self.entrance_location_id = Some(location_id);
        self
    }
}

/// Counters describing what the registry has done since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockStats {
    pub locks_loaded: u64,
    pub orphaned_rows_purged: u64,
    pub temporary_locks_created: u64,
    pub temporary_locks_discarded: u64,
    pub promotions: u64,
    pub shared_records_released: u64,
}

pub struct InstanceLockRegistry {
    store: LockStore,
    scheduler: ResetScheduler,
    locks_by_player: LockMap,
    temporary_locks_by_player: LockMap,
    shared_data: SharedLockTable,
    unloading: bool,
    stats: LockStats,
}

impl InstanceLockRegistry {
    pub fn new(store: LockStore, scheduler: ResetScheduler) -> Self {
        Self {
            store,
            scheduler,
            locks_by_player: HashMap::new(),
            temporary_locks_by_player: HashMap::new(),
            shared_data: SharedLockTable::new(),
            unloading: false,
            stats: LockStats::default(),
        }
    }

    pub fn store(&self) -> &LockStore {
        &self.store
    }

    pub fn scheduler(&self) -> &ResetScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Populate the registry from persisted rows.
    ///
    /// Shared instance rows are read first. A player lock on an instance-id bound
    /// map whose shared row is missing is deleted from storage and skipped. Shared
    /// rows no player lock references are released once loading finishes.
    pub fn load(
        &mut self,
        catalog: &MapCatalog,
        allocator: &mut InstanceIdAllocator,
    ) -> Result<(), LockoutError> {
        self.unloading = false;
        self.stats = LockStats::default();

        let mut loaded_shared: HashMap<u32, LockData> = HashMap::new();
        for row in self.store.load_shared_instances()? {
            loaded_shared.insert(
                row.instance_id,
                LockData {
                    data: row.data,
                    completed_encounters_mask: row.completed_encounters_mask,
                    entrance_location_id: row.entrance_location_id,
                },
            );
        }

        for row in self.store.load_player_locks()? {
            let expiry_time = DateTime::<Utc>::from_timestamp(row.expiry_time, 0)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            // Mark instance id as being used
            allocator.register(row.instance_id);

            let entries = catalog.entries(row.map_id, row.difficulty_id)?;
            let mut lock = if entries.is_instance_id_bound() {
                if !self.shared_data.contains(row.instance_id) {
                    match loaded_shared.remove(&row.instance_id) {
                        Some(data) => self.shared_data.insert(row.instance_id, data),
                        None => {
                            error!(
                                target: LOG_TARGET,
                                "Missing instance data for instance id based lock (id {})",
                                row.instance_id
                            );
                            let purged = self.store.delete_player_locks_for_instance(row.instance_id)?;
                            self.stats.orphaned_rows_purged += purged as u64;
                            continue;
                        }
                    }
                }
                self.shared_data.retain(row.instance_id);
                InstanceLock::new_shared(
                    row.map_id,
                    row.difficulty_id,
                    expiry_time,
                    row.instance_id,
                    row.instance_id,
                )
            } else {
                InstanceLock::new(
                    row.map_id,
                    row.difficulty_id,
                    expiry_time,
                    row.instance_id,
                    LockData {
                        data: row.data,
                        completed_encounters_mask: row.completed_encounters_mask,
                        entrance_location_id: row.entrance_location_id,
                    },
                )
            };
            lock.set_extended(row.extended);

            let key = LockKey::new(row.map_id, row.lock_id);
            self.store_lock(LockTable::Permanent, row.player, key, lock);
            self.stats.locks_loaded += 1;
        }

        // Shared rows nobody references any more
        for (instance_id, _) in loaded_shared {
            self.store.delete_shared_instance(instance_id)?;
            self.stats.shared_records_released += 1;
            debug!(
                target: LOG_TARGET,
                "Deleting instance {} as it is no longer referenced by any player", instance_id
            );
        }

        debug!(
            target: LOG_TARGET,
            "Loaded {} instance locks for {} players ({} shared instances)",
            self.stats.locks_loaded,
            self.locks_by_player.len(),
            self.shared_data.len()
        );
        Ok(())
    }

    /// Drop every lock and shared record without touching storage.
    pub fn unload(&mut self) {
        self.unloading = true;
        self.locks_by_player.clear();
        self.temporary_locks_by_player.clear();
        self.shared_data.clear();
    }

    pub fn is_unloading(&self) -> bool {
        self.unloading
    }

    /// Decide whether `player` may enter the instance owning `instance_lock`.
    pub fn can_join_instance_lock(
        &self,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
        instance_lock: &InstanceLock,
    ) -> AdmissionDecision {
        if !entries.has_reset_schedule() {
            return AdmissionDecision::Allowed;
        }

        let Some(player_lock) = self.find_active_instance_lock(player, entries) else {
            return AdmissionDecision::Allowed;
        };

        if entries.map.flex_locking {
            // Any encounter done in the player's lock but not in this instance blocks entry
            let player_mask = self.lock_data(player_lock).completed_encounters_mask;
            let instance_mask = self.lock_data(instance_lock).completed_encounters_mask;
            if player_mask & !instance_mask != 0 {
                return AdmissionDecision::AlreadyCompletedEncounter;
            }
            return AdmissionDecision::Allowed;
        }

        if !entries.map_difficulty.encounter_locks
            && player_lock.instance_id() != 0
            && player_lock.instance_id() != instance_lock.instance_id()
        {
            return AdmissionDecision::LockedToDifferentInstance;
        }

        AdmissionDecision::Allowed
    }

    fn table(&self, table: LockTable) -> &LockMap {
        match table {
            LockTable::Permanent => &self.locks_by_player,
            LockTable::Temporary => &self.temporary_locks_by_player,
        }
    }

    fn table_mut(&mut self, table: LockTable) -> &mut LockMap {
        match table {
            LockTable::Permanent => &mut self.locks_by_player,
            LockTable::Temporary => &mut self.temporary_locks_by_player,
        }
    }

    fn find_lock(&self, table: LockTable, player: PlayerGuid, key: &LockKey) -> Option<&InstanceLock> {
        self.table(table).get(&player)?.get(key)
    }

    fn take_lock(&mut self, table: LockTable, player: PlayerGuid, key: &LockKey) -> Option<InstanceLock> {
        let locks = self.table_mut(table);
        let player_locks = locks.get_mut(&player)?;
        let lock = player_locks.remove(key);
        if player_locks.is_empty() {
            locks.remove(&player);
        }
        lock
    }

    /// Put `lock` into `table`, releasing whatever lock it replaces.
    fn store_lock(
        &mut self,
        table: LockTable,
        player: PlayerGuid,
        key: LockKey,
        lock: InstanceLock,
    ) -> &InstanceLock {
        if let Some(replaced) = self.take_lock(table, player, &key) {
            self.release_lock(replaced);
        }
        let player_locks = self.table_mut(table).entry(player).or_default();
        player_locks.insert(key, lock);
        &player_locks[&key]
    }

    /// Destroy a lock, dropping its reference on shared data.
    fn release_lock(&mut self, lock: InstanceLock) {
        if let Some(instance_id) = lock.shared_instance_id() {
            if self.shared_data.release(instance_id) {
                self.on_shared_data_released(instance_id);
            }
        }
    }

    /// Active lock for the default query: temporary locks included, expired ones skipped.
    pub fn find_active_instance_lock(
        &self,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
    ) -> Option<&InstanceLock> {
        self.find_active_lock(player, entries, false, true)
    }

    /// Look up a player's lock for `entries`.
    ///
    /// Permanent locks win. With `ignore_expired`, an expired lock that is not
    /// extended counts as absent. Temporary locks are only consulted when no
    /// permanent lock matched and `ignore_temporary` is false.
    pub fn find_active_lock(
        &self,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
        ignore_temporary: bool,
        ignore_expired: bool,
    ) -> Option<&InstanceLock> {
        let key = entries.key();
        if let Some(lock) = self.find_lock(LockTable::Permanent, player, &key) {
            if !ignore_expired || lock.is_active(self.scheduler.now()) {
                return Some(lock);
            }
        }

        if ignore_temporary {
            return None;
        }

        self.find_lock(LockTable::Temporary, player, &key)
    }

    pub fn locks_for_player(&self, player: PlayerGuid) -> Vec<&InstanceLock> {
        self.locks_by_player
            .get(&player)
            .map(|locks| locks.values().collect())
            .unwrap_or_default()
    }

    pub fn temporary_locks_for_player(&self, player: PlayerGuid) -> Vec<&InstanceLock> {
        self.temporary_locks_by_player
            .get(&player)
            .map(|locks| locks.values().collect())
            .unwrap_or_default()
    }

    pub fn permanent_lock_count(&self) -> usize {
        self.locks_by_player.values().map(HashMap::len).sum()
    }

    pub fn temporary_lock_count(&self) -> usize {
        self.temporary_locks_by_player.values().map(HashMap::len).sum()
    }

    pub fn player_count(&self) -> usize {
        self.locks_by_player.len()
    }

    pub fn shared_instance_count(&self) -> usize {
        self.shared_data.len()
    }

    /// Payload of a lock, wherever it is stored.
    pub fn lock_data<'a>(&'a self, lock: &'a InstanceLock) -> &'a LockData {
        match lock.data_handle() {
            LockDataHandle::Exclusive(data) => data,
            LockDataHandle::Shared { instance_id } => match self.shared_data.get(*instance_id) {
                Some(data) => data,
                None => panic!(
                    "shared lock data for instance {} is gone while a lock still references it",
                    instance_id
                ),
            },
        }
    }

    fn lock_data_mut<'a>(&'a mut self, lock: &'a mut InstanceLock) -> &'a mut LockData {
        match lock.data_handle_mut() {
            LockDataHandle::Exclusive(data) => data,
            LockDataHandle::Shared { instance_id } => {
                let instance_id = *instance_id;
                match self.shared_data.get_mut(instance_id) {
                    Some(data) => data,
                    None => panic!(
                        "shared lock data for instance {} is gone while a lock still references it",
                        instance_id
                    ),
                }
            }
        }
    }

    pub fn shared_data(&self, instance_id: u32) -> Option<&LockData> {
        self.shared_data.get(instance_id)
    }

    /// Number of locks currently holding the shared record of `instance_id`.
    pub fn shared_references(&self, instance_id: u32) -> usize {
        self.shared_data.references(instance_id)
    }

    /// Stage a lock for a player entering a freshly created instance.
    ///
    /// Returns `None` for difficulties without a reset schedule. The lock stays
    /// temporary until [`Self::update_instance_lock_for_player`] confirms it.
    ///
    /// # Panics
    ///
    /// Panics if `instance_id` belongs to an instance-id bound map and shared
    /// data is already registered for it. Fresh ids come from
    /// [`InstanceIdAllocator::generate`].
    pub fn create_instance_lock_for_new_instance(
        &mut self,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
        instance_id: u32,
    ) -> Result<Option<&InstanceLock>, LockoutError> {
        if !entries.has_reset_schedule() {
            return Ok(None);
        }

        let map_id = entries.map_difficulty.map_id;
        let difficulty_id = entries.map_difficulty.difficulty_id;
        let expiry_time = self.scheduler.next_reset_time(entries);

        let lock = if entries.is_instance_id_bound() {
            self.shared_data.insert(instance_id, LockData::default());
            self.shared_data.retain(instance_id);
            InstanceLock::new_shared(map_id, difficulty_id, expiry_time, 0, instance_id)
        } else {
            InstanceLock::new(map_id, difficulty_id, expiry_time, 0, LockData::default())
        };

        self.stats.temporary_locks_created += 1;
        debug!(
            target: LOG_TARGET,
            "{} Created new temporary instance lock for {} in instance {}",
            entries, player, instance_id
        );
        Ok(Some(self.store_lock(LockTable::Temporary, player, entries.key(), lock)))
    }

    /// Abandon a player's temporary lock, e.g. when they leave a fresh instance
    /// before making any progress. Returns whether a lock was discarded.
    pub fn discard_temporary_lock(
        &mut self,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
    ) -> Result<bool, LockoutError> {
        let Some(lock) = self.take_lock(LockTable::Temporary, player, &entries.key()) else {
            return Ok(false);
        };
        self.stats.temporary_locks_discarded += 1;
        debug!(
            target: LOG_TARGET,
            "{} Discarded temporary instance lock for {}", entries, player
        );
        self.release_lock(lock);
        Ok(true)
    }

    /// Record progress for a player and persist the resulting lock into `transaction`.
    ///
    /// Reuses the player's active permanent lock, otherwise promotes their
    /// temporary lock, otherwise creates a new permanent lock. Panics if the
    /// event's instance does not match the lock it is applied to.
    pub fn update_instance_lock_for_player(
        &mut self,
        transaction: &mut LockTransaction,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
        update_event: InstanceLockUpdateEvent,
    ) -> Result<&InstanceLock, LockoutError> {
        let key = entries.key();
        let map_id = entries.map_difficulty.map_id;
        let difficulty_id = entries.map_difficulty.difficulty_id;
        let instance_id = update_event.instance_id;

        let has_active = self
            .find_active_lock(player, entries, true, true)
            .is_some();

        let existing = if has_active {
            self.take_lock(LockTable::Permanent, player, &key)
        } else {
            // Player can still change their mind, exit the instance and reactivate an old
            // lock until the temporary one is promoted here
            let promoted = self.take_lock(LockTable::Temporary, player, &key);
            if promoted.is_some() {
                self.stats.promotions += 1;
                debug!(
                    target: LOG_TARGET,
                    "{} Promoting temporary lock to permanent for {} in instance {}",
                    entries, player, instance_id
                );
            }
            promoted
        };

        let mut lock = match existing {
            Some(mut lock) => {
                if entries.is_instance_id_bound() {
                    assert!(
                        lock.instance_id() == 0 || lock.instance_id() == instance_id,
                        "{} lock of {} is bound to instance {} but update is for instance {}",
                        entries,
                        player,
                        lock.instance_id(),
                        instance_id
                    );
                    assert!(
                        self.shared_data.contains(instance_id),
                        "{} no shared data registered for instance {}",
                        entries,
                        instance_id
                    );
                    assert_eq!(
                        lock.shared_instance_id(),
                        Some(instance_id),
                        "{} lock of {} does not reference the shared data of instance {}",
                        entries,
                        player,
                        instance_id
                    );
                }
                lock.set_instance_id(instance_id);
                lock
            }
            None => {
                let expiry_time = self.scheduler.next_reset_time(entries);
                let lock = if entries.is_instance_id_bound() {
                    assert!(
                        self.shared_data.contains(instance_id),
                        "{} no shared data registered for instance {}",
                        entries,
                        instance_id
                    );
                    self.shared_data.retain(instance_id);
                    InstanceLock::new_shared(
                        map_id,
                        difficulty_id,
                        expiry_time,
                        instance_id,
                        instance_id,
                    )
                } else {
                    InstanceLock::new(
                        map_id,
                        difficulty_id,
                        expiry_time,
                        instance_id,
                        LockData::default(),
                    )
                };
                debug!(
                    target: LOG_TARGET,
                    "{} Created new instance lock for {} in instance {}",
                    entries, player, instance_id
                );
                lock
            }
        };

        {
            let data = self.lock_data_mut(&mut lock);
            data.data = update_event.new_data;
            if let Some(location_id) = update_event.entrance_location_id {
                data.entrance_location_id = location_id;
            }
            if let Some(encounter) = &update_event.completed_encounter {
                data.completed_encounters_mask |= encounter.mask();
            }
            // Keep the player's view in sync when progress is not tracked per encounter
            if !entries.map_difficulty.encounter_locks {
                data.completed_encounters_mask |= update_event.instance_completed_encounters_mask;
            }
        }
        if let Some(encounter) = &update_event.completed_encounter {
            info!(
                target: "audit",
                "{} Instance lock for {} in instance {} gains completed encounter [{}-{}]",
                entries, player, instance_id, encounter.id, encounter.name
            );
        }

        if lock.is_expired(self.scheduler.now()) {
            assert!(
                lock.is_extended(),
                "{} instance lock of {} must have been extended to create instance map from it",
                entries,
                player
            );
            lock.set_expiry_time(self.scheduler.next_reset_time(entries));
            lock.set_extended(false);
            debug!(
                target: LOG_TARGET,
                "{} Expired instance lock for {} in instance {} is now active",
                entries, player, instance_id
            );
        }

        let row = {
            let data = self.lock_data(&lock);
            PlayerLockRow {
                player,
                map_id,
                lock_id: key.lock_id,
                instance_id: lock.instance_id(),
                difficulty_id,
                data: data.data.clone(),
                completed_encounters_mask: data.completed_encounters_mask,
                entrance_location_id: data.entrance_location_id,
                expiry_time: lock.expiry_time().timestamp(),
                extended: lock.is_extended(),
                schema_version: PLAYER_LOCK_SCHEMA_VERSION,
            }
        };
        transaction.append(LockStatement::DeletePlayerLock {
            player,
            map_id,
            lock_id: key.lock_id,
        });
        transaction.append(LockStatement::InsertPlayerLock(row));

        Ok(self.store_lock(LockTable::Permanent, player, key, lock))
    }

    /// Record instance-wide progress directly on the shared record of an instance.
    ///
    /// Panics if no shared record exists for the event's instance.
    pub fn update_shared_instance_lock(
        &mut self,
        transaction: &mut LockTransaction,
        update_event: InstanceLockUpdateEvent,
    ) {
        let instance_id = update_event.instance_id;
        let Some(data) = self.shared_data.get_mut(instance_id) else {
            panic!("no shared lock data registered for instance {}", instance_id);
        };

        data.data = update_event.new_data;
        if let Some(location_id) = update_event.entrance_location_id {
            data.entrance_location_id = location_id;
        }
        if let Some(encounter) = &update_event.completed_encounter {
            data.completed_encounters_mask |= encounter.mask();
            info!(
                target: "audit",
                "Instance {} gains completed encounter [{}-{}]",
                instance_id, encounter.id, encounter.name
            );
        }

        let row = SharedInstanceRow {
            instance_id,
            data: data.data.clone(),
            completed_encounters_mask: data.completed_encounters_mask,
            entrance_location_id: data.entrance_location_id,
            schema_version: SHARED_INSTANCE_SCHEMA_VERSION,
        };
        transaction.append(LockStatement::DeleteSharedInstance { instance_id });
        transaction.append(LockStatement::InsertSharedInstance(row));
    }

    /// The last lock referencing the shared record of `instance_id` is gone.
    ///
    /// Runs in the middle of table updates, so a failed row delete is logged and
    /// left for the next `load()` to clean up as an unreferenced row.
    fn on_shared_data_released(&mut self, instance_id: u32) {
        if self.unloading {
            return;
        }

        self.shared_data.remove(instance_id);
        self.stats.shared_records_released += 1;
        debug!(
            target: LOG_TARGET,
            "Deleting instance {} as it is no longer referenced by any player", instance_id
        );
        if let Err(e) = self.store.delete_shared_instance(instance_id) {
            error!(
                target: LOG_TARGET,
                "Failed to delete instance {} from storage: {}", instance_id, e
            );
        }
    }

    /// Set or clear the extension flag of a player's permanent lock, expired or not.
    /// Does nothing when the player has no such lock.
    pub fn update_instance_lock_extension_for_player(
        &mut self,
        player: PlayerGuid,
        entries: &MapDifficultyEntries<'_>,
        extended: bool,
    ) -> Result<(), LockoutError> {
        let key = entries.key();
        let Some(lock) = self
            .locks_by_player
            .get_mut(&player)
            .and_then(|locks| locks.get_mut(&key))
        else {
            return Ok(());
        };

        lock.set_extended(extended);
        self.store
            .update_extension(player, key.map_id, key.lock_id, extended)?;
        debug!(
            target: LOG_TARGET,
            "{} Instance lock for {} is {} extended",
            entries,
            player,
            if extended { "now" } else { "no longer" }
        );
        Ok(())
    }

    pub fn next_reset_time(&self, entries: &MapDifficultyEntries<'_>) -> DateTime<Utc> {
        self.scheduler.next_reset_time(entries)
    }

    pub fn effective_expiry_time(
        &self,
        lock: &InstanceLock,
        entries: &MapDifficultyEntries<'_>,
    ) -> DateTime<Utc> {
        lock.effective_expiry_time(entries, &self.scheduler)
    }
}
