//! Instance lockouts: reset calendar, lock entities, shared instance progress and
//! the registry tying them to persisted rows.

pub mod allocator;
pub mod catalog;
pub mod clock;
pub mod data;
pub mod errors;
pub mod lock;
pub mod registry;
pub mod schedule;
pub mod storage;
pub mod types;

pub use allocator::InstanceIdAllocator;
pub use catalog::{
    DungeonEncounterEntry, MapCatalog, MapDifficultyEntries, MapDifficultyEntry, MapEntry,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use data::{LockData, SharedLockTable};
pub use errors::LockoutError;
pub use lock::{InstanceLock, LockDataHandle};
pub use registry::{InstanceLockRegistry, InstanceLockUpdateEvent, LockStats};
pub use schedule::{next_reset_time, ResetScheduler};
pub use storage::{LockStatement, LockStore, LockTransaction, PlayerLockRow, SharedInstanceRow};
pub use types::{AdmissionDecision, LockKey, PlayerGuid, ResetInterval};
