//! Read-only reference data describing maps, their difficulties and encounters.
//!
//! The catalog is loaded once from a TOML file and indexed for the
//! `(map_id, difficulty_id)` lookups the lock registry performs on every call.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::lockout::errors::LockoutError;
use crate::lockout::types::{LockKey, ResetInterval};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapEntry {
    pub id: u32,
    pub name: String,
    /// Lock comparison uses encounter progress instead of instance ids.
    #[serde(default)]
    pub flex_locking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapDifficultyEntry {
    pub map_id: u32,
    pub difficulty_id: u8,
    pub lock_id: u32,
    pub name: String,
    #[serde(default)]
    pub reset_interval: ResetInterval,
    /// Progress is tracked per encounter rather than per instance.
    #[serde(default)]
    pub encounter_locks: bool,
}

impl MapDifficultyEntry {
    pub fn has_reset_schedule(&self) -> bool {
        self.reset_interval != ResetInterval::None
    }

    /// Length of one reset period.
    pub fn raid_duration(&self) -> Duration {
        match self.reset_interval {
            ResetInterval::Daily => Duration::days(1),
            ResetInterval::Weekly => Duration::days(7),
            ResetInterval::None => Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DungeonEncounterEntry {
    pub id: u32,
    pub map_id: u32,
    pub name: String,
    pub bit: u8,
}

impl DungeonEncounterEntry {
    pub fn mask(&self) -> u32 {
        1u32.checked_shl(u32::from(self.bit)).unwrap_or(0)
    }
}

/// Map and difficulty rows resolved together; the unit every registry call works on.
#[derive(Debug, Clone, Copy)]
pub struct MapDifficultyEntries<'a> {
    pub map: &'a MapEntry,
    pub map_difficulty: &'a MapDifficultyEntry,
}

impl<'a> MapDifficultyEntries<'a> {
    pub fn new(map: &'a MapEntry, map_difficulty: &'a MapDifficultyEntry) -> Self {
        Self {
            map,
            map_difficulty,
        }
    }

    pub fn key(&self) -> LockKey {
        LockKey::new(self.map_difficulty.map_id, self.map_difficulty.lock_id)
    }

    /// Locks on this map/difficulty share one progress record per instance id.
    pub fn is_instance_id_bound(&self) -> bool {
        !self.map.flex_locking && !self.map_difficulty.encounter_locks
    }

    pub fn has_reset_schedule(&self) -> bool {
        self.map_difficulty.has_reset_schedule()
    }

    pub fn raid_duration(&self) -> Duration {
        self.map_difficulty.raid_duration()
    }
}

impl fmt::Display for MapDifficultyEntries<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}-{} | {}-{}]",
            self.map.id,
            self.map.name,
            self.map_difficulty.difficulty_id,
            self.map_difficulty.name
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapCatalog {
    #[serde(default)]
    maps: Vec<MapEntry>,
    #[serde(default)]
    difficulties: Vec<MapDifficultyEntry>,
    #[serde(default)]
    encounters: Vec<DungeonEncounterEntry>,
    #[serde(skip)]
    map_index: HashMap<u32, usize>,
    #[serde(skip)]
    difficulty_index: HashMap<(u32, u8), usize>,
    #[serde(skip)]
    encounter_index: HashMap<u32, usize>,
}

impl MapCatalog {
    /// Build and validate a catalog from already materialized rows.
    pub fn new(
        maps: Vec<MapEntry>,
        difficulties: Vec<MapDifficultyEntry>,
        encounters: Vec<DungeonEncounterEntry>,
    ) -> Result<Self, LockoutError> {
        let mut catalog = Self {
            maps,
            difficulties,
            encounters,
            ..Default::default()
        };
        catalog.reindex()?;
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LockoutError> {
        let mut catalog: MapCatalog = toml::from_str(content)?;
        catalog.reindex()?;
        Ok(catalog)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, LockoutError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    fn reindex(&mut self) -> Result<(), LockoutError> {
        self.map_index.clear();
        self.difficulty_index.clear();
        self.encounter_index.clear();

        for (idx, map) in self.maps.iter().enumerate() {
            if self.map_index.insert(map.id, idx).is_some() {
                return Err(LockoutError::InvalidCatalog(format!(
                    "duplicate map id {}",
                    map.id
                )));
            }
        }

        for (idx, difficulty) in self.difficulties.iter().enumerate() {
            if !self.map_index.contains_key(&difficulty.map_id) {
                return Err(LockoutError::InvalidCatalog(format!(
                    "difficulty {} references unknown map {}",
                    difficulty.difficulty_id, difficulty.map_id
                )));
            }
            let key = (difficulty.map_id, difficulty.difficulty_id);
            if self.difficulty_index.insert(key, idx).is_some() {
                return Err(LockoutError::InvalidCatalog(format!(
                    "duplicate difficulty {} for map {}",
                    difficulty.difficulty_id, difficulty.map_id
                )));
            }
        }

        let mut used_bits: HashSet<(u32, u8)> = HashSet::new();
        for (idx, encounter) in self.encounters.iter().enumerate() {
            if encounter.bit >= 32 {
                return Err(LockoutError::InvalidCatalog(format!(
                    "encounter {} uses bit {} (max 31)",
                    encounter.id, encounter.bit
                )));
            }
            if !used_bits.insert((encounter.map_id, encounter.bit)) {
                return Err(LockoutError::InvalidCatalog(format!(
                    "encounter {} reuses bit {} on map {}",
                    encounter.id, encounter.bit, encounter.map_id
                )));
            }
            if self.encounter_index.insert(encounter.id, idx).is_some() {
                return Err(LockoutError::InvalidCatalog(format!(
                    "duplicate encounter id {}",
                    encounter.id
                )));
            }
        }

        Ok(())
    }

    pub fn map(&self, map_id: u32) -> Option<&MapEntry> {
        self.map_index.get(&map_id).map(|&idx| &self.maps[idx])
    }

    /// Resolve the map and difficulty rows for a lock.
    pub fn entries(
        &self,
        map_id: u32,
        difficulty_id: u8,
    ) -> Result<MapDifficultyEntries<'_>, LockoutError> {
        let unknown = || LockoutError::UnknownMapDifficulty {
            map_id,
            difficulty_id,
        };
        let map = self.map(map_id).ok_or_else(unknown)?;
        let idx = self
            .difficulty_index
            .get(&(map_id, difficulty_id))
            .ok_or_else(unknown)?;
        Ok(MapDifficultyEntries::new(map, &self.difficulties[*idx]))
    }

    pub fn encounter(&self, encounter_id: u32) -> Option<&DungeonEncounterEntry> {
        self.encounter_index
            .get(&encounter_id)
            .map(|&idx| &self.encounters[idx])
    }

    pub fn encounters_for_map(&self, map_id: u32) -> impl Iterator<Item = &DungeonEncounterEntry> {
        self.encounters.iter().filter(move |e| e.map_id == map_id)
    }

    pub fn difficulties(&self) -> &[MapDifficultyEntry] {
        &self.difficulties
    }

    /// Small catalog written by `lockwarden init` as a starting point.
    pub fn sample() -> Self {
        let maps = vec![
            MapEntry {
                id: 33,
                name: "Shadowfang Keep".to_string(),
                flex_locking: false,
            },
            MapEntry {
                id: 631,
                name: "Icecrown Citadel".to_string(),
                flex_locking: false,
            },
            MapEntry {
                id: 1205,
                name: "Blackrock Foundry".to_string(),
                flex_locking: true,
            },
        ];
        let difficulties = vec![
            MapDifficultyEntry {
                map_id: 33,
                difficulty_id: 2,
                lock_id: 0,
                name: "Heroic".to_string(),
                reset_interval: ResetInterval::Daily,
                encounter_locks: false,
            },
            MapDifficultyEntry {
                map_id: 631,
                difficulty_id: 3,
                lock_id: 0,
                name: "10 Player".to_string(),
                reset_interval: ResetInterval::Weekly,
                encounter_locks: false,
            },
            MapDifficultyEntry {
                map_id: 1205,
                difficulty_id: 16,
                lock_id: 0,
                name: "Mythic".to_string(),
                reset_interval: ResetInterval::Weekly,
                encounter_locks: true,
            },
        ];
        let encounters = vec![
            DungeonEncounterEntry {
                id: 845,
                map_id: 631,
                name: "Lord Marrowgar".to_string(),
                bit: 0,
            },
            DungeonEncounterEntry {
                id: 846,
                map_id: 631,
                name: "Lady Deathwhisper".to_string(),
                bit: 1,
            },
            DungeonEncounterEntry {
                id: 1696,
                map_id: 1205,
                name: "Oregorger".to_string(),
                bit: 0,
            },
        ];
        // The sample rows are consistent by construction; fall back to an empty catalog otherwise.
        Self::new(maps, difficulties, encounters).unwrap_or_default()
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[maps]]
id = 631
name = "Icecrown Citadel"

[[maps]]
id = 1205
name = "Blackrock Foundry"
flex_locking = true

[[difficulties]]
map_id = 631
difficulty_id = 3
lock_id = 0
name = "10 Player"
reset_interval = "weekly"

[[difficulties]]
map_id = 1205
difficulty_id = 14
lock_id = 0
name = "Normal"
reset_interval = "weekly"
encounter_locks = true

[[encounters]]
id = 845
map_id = 631
name = "Lord Marrowgar"
bit = 0
"#;

    #[test]
    fn parses_and_resolves_entries() {
        let catalog = MapCatalog::from_toml_str(CATALOG).expect("catalog");
        let entries = catalog.entries(631, 3).expect("entries");
        assert!(entries.is_instance_id_bound());
        assert!(entries.has_reset_schedule());
        assert_eq!(entries.key(), LockKey::new(631, 0));
        assert_eq!(entries.raid_duration(), Duration::days(7));
        assert_eq!(entries.to_string(), "[631-Icecrown Citadel | 3-10 Player]");

        let flex = catalog.entries(1205, 14).expect("flex entries");
        assert!(!flex.is_instance_id_bound());

        assert_eq!(catalog.encounter(845).map(|e| e.mask()), Some(1));
    }

    #[test]
    fn unknown_difficulty_is_an_error() {
        let catalog = MapCatalog::from_toml_str(CATALOG).expect("catalog");
        match catalog.entries(631, 9) {
            Err(LockoutError::UnknownMapDifficulty {
                map_id: 631,
                difficulty_id: 9,
            }) => {}
            other => panic!("unexpected result: {:?}", other.map(|e| e.to_string())),
        }
    }

    #[test]
    fn rejects_out_of_range_encounter_bit() {
        let result = MapCatalog::new(
            vec![MapEntry {
                id: 1,
                name: "Test".into(),
                flex_locking: false,
            }],
            vec![],
            vec![DungeonEncounterEntry {
                id: 1,
                map_id: 1,
                name: "Boss".into(),
                bit: 32,
            }],
        );
        assert!(matches!(result, Err(LockoutError::InvalidCatalog(_))));
    }

    #[test]
    fn rejects_difficulty_for_unknown_map() {
        let result = MapCatalog::new(
            vec![],
            vec![MapDifficultyEntry {
                map_id: 7,
                difficulty_id: 1,
                lock_id: 0,
                name: "Normal".into(),
                reset_interval: ResetInterval::Daily,
                encounter_locks: false,
            }],
            vec![],
        );
        assert!(matches!(result, Err(LockoutError::InvalidCatalog(_))));
    }

    #[test]
    fn sample_round_trips_through_toml() {
        let sample = MapCatalog::sample();
        let text = sample.to_toml_string().expect("serialize");
        let parsed = MapCatalog::from_toml_str(&text).expect("parse");
        assert_eq!(parsed.difficulties().len(), sample.difficulties().len());
        assert!(parsed.entries(33, 2).is_ok());
    }

    #[tokio::test]
    async fn loads_catalog_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.toml");
        tokio::fs::write(&path, CATALOG).await.expect("write");
        let catalog = MapCatalog::load(&path).await.expect("load");
        assert_eq!(catalog.difficulties().len(), 2);
        assert_eq!(catalog.encounters_for_map(631).count(), 1);

        let missing = MapCatalog::load(dir.path().join("nope.toml")).await;
        assert!(matches!(missing, Err(LockoutError::Io(_))));
    }
}
