//! Test utilities & fixtures.
//! Builds a throwaway registry on a temp sled store with a controllable clock.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use lockwarden::config::ResetScheduleConfig;
use lockwarden::lockout::{
    DungeonEncounterEntry, InstanceIdAllocator, InstanceLockRegistry, InstanceLockUpdateEvent,
    LockStore, LockTransaction, ManualClock, MapCatalog, PlayerGuid, ResetScheduler,
};
use tempfile::TempDir;

pub const ICC: u32 = 631; // weekly, instance-id bound
pub const ICC_10: u8 = 3;
pub const SFK: u32 = 33; // daily, instance-id bound
pub const SFK_HEROIC: u8 = 2;
pub const BRF: u32 = 1205; // weekly, flex locking
pub const BRF_NORMAL: u8 = 14;
pub const HFC: u32 = 1448; // weekly, encounter locks
pub const HFC_MYTHIC: u8 = 16;
pub const DEADMINES: u32 = 36; // no reset schedule
pub const DEADMINES_NORMAL: u8 = 1;

pub const ALICE: PlayerGuid = PlayerGuid(1);
pub const BOB: PlayerGuid = PlayerGuid(2);

const CATALOG: &str = r#"
[[maps]]
id = 631
name = "Icecrown Citadel"

[[maps]]
id = 33
name = "Shadowfang Keep"

[[maps]]
id = 1205
name = "Blackrock Foundry"
flex_locking = true

[[maps]]
id = 1448
name = "Hellfire Citadel"

[[maps]]
id = 36
name = "Deadmines"

[[difficulties]]
map_id = 631
difficulty_id = 3
lock_id = 0
name = "10 Player"
reset_interval = "weekly"

[[difficulties]]
map_id = 33
difficulty_id = 2
lock_id = 0
name = "Heroic"
reset_interval = "daily"

[[difficulties]]
map_id = 1205
difficulty_id = 14
lock_id = 0
name = "Normal"
reset_interval = "weekly"

[[difficulties]]
map_id = 1448
difficulty_id = 16
lock_id = 0
name = "Mythic"
reset_interval = "weekly"
encounter_locks = true

[[difficulties]]
map_id = 36
difficulty_id = 1
lock_id = 0
name = "Normal"

[[encounters]]
id = 845
map_id = 631
name = "Lord Marrowgar"
bit = 0

[[encounters]]
id = 846
map_id = 631
name = "Lady Deathwhisper"
bit = 1

[[encounters]]
id = 847
map_id = 631
name = "Gunship Battle"
bit = 2

[[encounters]]
id = 1696
map_id = 1205
name = "Oregorger"
bit = 0

[[encounters]]
id = 1689
map_id = 1205
name = "Flamebender Ka'graz"
bit = 1

[[encounters]]
id = 1778
map_id = 1448
name = "Hellfire Assault"
bit = 0
"#;

pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, min, 0))
        .expect("valid date")
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    local(y, m, d, h, min).and_utc()
}

pub fn catalog() -> MapCatalog {
    MapCatalog::from_toml_str(CATALOG).expect("catalog")
}

pub fn encounter(catalog: &MapCatalog, id: u32) -> DungeonEncounterEntry {
    catalog.encounter(id).cloned().expect("encounter")
}

/// Registry plus everything it needs, sharing one temp directory.
///
/// Borrow `world.catalog` and `world.registry` as separate fields so entries
/// can be held while the registry is mutated.
pub struct TestWorld {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub catalog: MapCatalog,
    pub allocator: InstanceIdAllocator,
    pub registry: InstanceLockRegistry,
}

impl TestWorld {
    /// Fresh world on Monday 2024-01-01 10:00, local time == UTC.
    pub fn new() -> Self {
        Self::load_from(TempDir::new().expect("tempdir"), local(2024, 1, 1, 10, 0))
    }

    /// Load a registry over an existing store directory.
    pub fn load_from(dir: TempDir, now: NaiveDateTime) -> Self {
        let clock = Arc::new(ManualClock::at_local(
            now,
            FixedOffset::east_opt(0).expect("offset"),
        ));
        let catalog = catalog();
        let mut allocator = InstanceIdAllocator::new();
        let mut registry = open_registry(&dir, &clock);
        registry.load(&catalog, &mut allocator).expect("load");
        Self {
            dir,
            clock,
            catalog,
            allocator,
            registry,
        }
    }

    /// Simulate a server restart: unload, reopen the same store and load again.
    pub fn restart(self) -> Self {
        let TestWorld {
            dir,
            clock,
            catalog,
            mut registry,
            ..
        } = self;
        registry.unload();
        drop(registry);

        let mut allocator = InstanceIdAllocator::new();
        let mut registry = open_registry(&dir, &clock);
        registry.load(&catalog, &mut allocator).expect("reload");
        Self {
            dir,
            clock,
            catalog,
            allocator,
            registry,
        }
    }
}

fn open_registry(dir: &TempDir, clock: &Arc<ManualClock>) -> InstanceLockRegistry {
    let store = LockStore::open(dir.path()).expect("store");
    let scheduler = ResetScheduler::new(ResetScheduleConfig::default(), clock.clone());
    InstanceLockRegistry::new(store, scheduler)
}

/// Open a bare store for seeding rows before a registry loads them.
pub fn seed_store(dir: &TempDir) -> LockStore {
    LockStore::open(dir.path()).expect("store")
}

/// Allocate a fresh instance id and stage a temporary lock for `player` in it.
pub fn enter_new_instance(world: &mut TestWorld, player: PlayerGuid, map_id: u32, difficulty_id: u8) -> u32 {
    let entries = world.catalog.entries(map_id, difficulty_id).expect("entries");
    let instance_id = world.allocator.generate();
    world
        .registry
        .create_instance_lock_for_new_instance(player, &entries, instance_id)
        .expect("create lock");
    instance_id
}

/// Report an encounter kill the way an instance does: update the player's lock,
/// update the shared record for bound maps, then commit both in one transaction.
pub fn record_kill(
    world: &mut TestWorld,
    player: PlayerGuid,
    map_id: u32,
    difficulty_id: u8,
    instance_id: u32,
    encounter_id: u32,
) {
    let entries = world.catalog.entries(map_id, difficulty_id).expect("entries");
    let encounter = encounter(&world.catalog, encounter_id);
    let instance_mask = world
        .registry
        .shared_data(instance_id)
        .map(|data| data.completed_encounters_mask)
        .unwrap_or(0)
        | encounter.mask();
    let event = InstanceLockUpdateEvent::new(instance_id, format!("killed {}", encounter.name))
        .with_completed_encounter(encounter)
        .with_instance_completed_mask(instance_mask);

    let mut tx = LockTransaction::new();
    world
        .registry
        .update_instance_lock_for_player(&mut tx, player, &entries, event.clone())
        .expect("update lock");
    if entries.is_instance_id_bound() {
        world.registry.update_shared_instance_lock(&mut tx, event);
    }
    world.registry.store().commit(tx).expect("commit");
}
