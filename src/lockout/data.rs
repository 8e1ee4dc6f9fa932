//! Lock payloads and the reference-counted table that holds the shared ones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Mutable progress carried by a lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockData {
    /// Opaque instance script state.
    pub data: String,
    pub completed_encounters_mask: u32,
    pub entrance_location_id: u32,
}

impl LockData {
    pub fn new(data: impl Into<String>, completed_encounters_mask: u32) -> Self {
        Self {
            data: data.into(),
            completed_encounters_mask,
            entrance_location_id: 0,
        }
    }
}

#[derive(Debug)]
struct SharedSlot {
    data: LockData,
    references: usize,
}

/// Progress records shared by every lock bound to the same instance id.
///
/// Each slot counts the locks referencing it. The table never frees a slot on its
/// own: [`SharedLockTable::release`] reports when a count reaches zero and the
/// owning registry decides what happens next.
#[derive(Debug, Default)]
pub struct SharedLockTable {
    slots: HashMap<u32, SharedSlot>,
}

impl SharedLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register fresh data for `instance_id` with no references yet.
    ///
    /// Panics if the instance id is still bound to live shared data.
    pub fn insert(&mut self, instance_id: u32, data: LockData) {
        if let Some(existing) = self.slots.get(&instance_id) {
            panic!(
                "instance {} already has shared lock data with {} references",
                instance_id, existing.references
            );
        }
        self.slots.insert(
            instance_id,
            SharedSlot {
                data,
                references: 0,
            },
        );
    }

    pub fn retain(&mut self, instance_id: u32) {
        match self.slots.get_mut(&instance_id) {
            Some(slot) => slot.references += 1,
            None => panic!("retaining shared lock data for unknown instance {}", instance_id),
        }
    }

    /// Drop one reference. Returns true when it was the last one.
    pub fn release(&mut self, instance_id: u32) -> bool {
        match self.slots.get_mut(&instance_id) {
            Some(slot) => {
                assert!(
                    slot.references > 0,
                    "shared lock data for instance {} released more often than retained",
                    instance_id
                );
                slot.references -= 1;
                slot.references == 0
            }
            None => panic!("releasing shared lock data for unknown instance {}", instance_id),
        }
    }

    pub fn remove(&mut self, instance_id: u32) -> Option<LockData> {
        self.slots.remove(&instance_id).map(|slot| slot.data)
    }

    pub fn get(&self, instance_id: u32) -> Option<&LockData> {
        self.slots.get(&instance_id).map(|slot| &slot.data)
    }

    pub fn get_mut(&mut self, instance_id: u32) -> Option<&mut LockData> {
        self.slots.get_mut(&instance_id).map(|slot| &mut slot.data)
    }

    pub fn contains(&self, instance_id: u32) -> bool {
        self.slots.contains_key(&instance_id)
    }

    pub fn references(&self, instance_id: u32) -> usize {
        self.slots.get(&instance_id).map_or(0, |slot| slot.references)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
