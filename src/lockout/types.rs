use serde::{Deserialize, Serialize};
use std::fmt;

pub const PLAYER_LOCK_SCHEMA_VERSION: u8 = 1;
pub const SHARED_INSTANCE_SCHEMA_VERSION: u8 = 1;

/// Persistent player identity (the low counter of the player's guid).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerGuid(pub u64);

impl PlayerGuid {
    pub fn counter(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlayerGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player-{}", self.0)
    }
}

/// One reset-schedule slot a player can hold per map. Several difficulties of the
/// same map may share a lock id and therefore a slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub map_id: u32,
    pub lock_id: u32,
}

impl LockKey {
    pub fn new(map_id: u32, lock_id: u32) -> Self {
        Self { map_id, lock_id }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetInterval {
    #[default]
    None,
    Daily,
    Weekly,
}

impl ResetInterval {
    pub fn description(&self) -> &'static str {
        match self {
            ResetInterval::None => "No reset",
            ResetInterval::Daily => "Daily",
            ResetInterval::Weekly => "Weekly",
        }
    }
}

/// Outcome of an admission check. Rejections carry the reason shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    Allowed,
    /// The player's lock has a completed encounter this instance has not completed.
    AlreadyCompletedEncounter,
    /// The player is already saved to another instance of this map.
    LockedToDifferentInstance,
}

impl AdmissionDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AdmissionDecision::Allowed)
    }

    pub fn message(self) -> &'static str {
        match self {
            AdmissionDecision::Allowed => "Entry allowed.",
            AdmissionDecision::AlreadyCompletedEncounter => {
                "You have already defeated an encounter this instance has not."
            }
            AdmissionDecision::LockedToDifferentInstance => {
                "You are already locked to a different instance."
            }
        }
    }
}
