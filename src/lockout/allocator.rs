use std::collections::BTreeSet;

use log::debug;

/// Tracks which instance ids are in use so a persisted lock's instance id is never
/// handed to a brand new instance.
#[derive(Debug, Default)]
pub struct InstanceIdAllocator {
    in_use: BTreeSet<u32>,
}

impl InstanceIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an id as taken. Id 0 means "no instance" and is ignored.
    pub fn register(&mut self, instance_id: u32) {
        if instance_id != 0 && self.in_use.insert(instance_id) {
            debug!(target: "instance.locks", "Reserved instance id {}", instance_id);
        }
    }

    pub fn is_registered(&self, instance_id: u32) -> bool {
        self.in_use.contains(&instance_id)
    }

    /// Lowest free id, starting at 1. The returned id is registered.
    pub fn generate(&mut self) -> u32 {
        let mut candidate = 1u32;
        for &used in &self.in_use {
            if used != candidate {
                break;
            }
            candidate += 1;
        }
        self.in_use.insert(candidate);
        candidate
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }
}
