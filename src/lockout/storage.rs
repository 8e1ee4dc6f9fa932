//! Sled-backed persistence for player locks and shared instance records.
//!
//! Mutations made by the registry are collected in a [`LockTransaction`] owned by
//! the caller; nothing is written until the caller hands it to
//! [`LockStore::commit`]. Load-time cleanup, shared-record deletion and extension
//! toggles are written immediately.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Transactional};

use crate::lockout::errors::LockoutError;
use crate::lockout::types::{PlayerGuid, PLAYER_LOCK_SCHEMA_VERSION, SHARED_INSTANCE_SCHEMA_VERSION};

const TREE_PLAYER_LOCKS: &str = "instance_locks";
const TREE_INSTANCES: &str = "instances";

const PLAYER_LOCK_PREFIX: &[u8] = b"locks:";

/// Persisted progress of one instance shared by all locks bound to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedInstanceRow {
    pub instance_id: u32,
    pub data: String,
    pub completed_encounters_mask: u32,
    pub entrance_location_id: u32,
    pub schema_version: u8,
}

impl SharedInstanceRow {
    pub fn new(instance_id: u32, data: impl Into<String>, completed_encounters_mask: u32) -> Self {
        Self {
            instance_id,
            data: data.into(),
            completed_encounters_mask,
            entrance_location_id: 0,
            schema_version: SHARED_INSTANCE_SCHEMA_VERSION,
        }
    }
}

/// Persisted lock of one player, unique per (player, map, lock id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerLockRow {
    pub player: PlayerGuid,
    pub map_id: u32,
    pub lock_id: u32,
    pub instance_id: u32,
    pub difficulty_id: u8,
    pub data: String,
    pub completed_encounters_mask: u32,
    pub entrance_location_id: u32,
    /// Unix epoch seconds.
    pub expiry_time: i64,
    pub extended: bool,
    pub schema_version: u8,
}

/// One write queued by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatement {
    DeletePlayerLock {
        player: PlayerGuid,
        map_id: u32,
        lock_id: u32,
    },
    InsertPlayerLock(PlayerLockRow),
    DeleteSharedInstance {
        instance_id: u32,
    },
    InsertSharedInstance(SharedInstanceRow),
}

/// Append-only batch of statements, committed by whoever owns it.
#[derive(Debug, Clone, Default)]
pub struct LockTransaction {
    statements: Vec<LockStatement>,
}

impl LockTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, statement: LockStatement) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[LockStatement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

enum TreeId {
    PlayerLocks,
    Instances,
}

enum PreparedOp {
    Put(TreeId, Vec<u8>, Vec<u8>),
    Remove(TreeId, Vec<u8>),
}

/// Lock persistence rooted at a sled database directory.
#[derive(Clone)]
pub struct LockStore {
    _db: sled::Db,
    player_locks: sled::Tree,
    instances: sled::Tree,
}

impl LockStore {
    /// Open (or create) the lock store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LockoutError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let player_locks = db.open_tree(TREE_PLAYER_LOCKS)?;
        let instances = db.open_tree(TREE_INSTANCES)?;
        Ok(Self {
            _db: db,
            player_locks,
            instances,
        })
    }

    fn player_lock_key(player: PlayerGuid, map_id: u32, lock_id: u32) -> Vec<u8> {
        format!("locks:{:020}:{:010}:{:010}", player.counter(), map_id, lock_id).into_bytes()
    }

    fn instance_key(instance_id: u32) -> Vec<u8> {
        format!("instances:{:010}", instance_id).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, LockoutError> {
        Ok(bincode::serialize(value)?)
    }

    fn decode_player_lock(bytes: IVec) -> Result<PlayerLockRow, LockoutError> {
        let row: PlayerLockRow = bincode::deserialize(&bytes)?;
        if row.schema_version != PLAYER_LOCK_SCHEMA_VERSION {
            return Err(LockoutError::SchemaMismatch {
                entity: "player_lock",
                expected: PLAYER_LOCK_SCHEMA_VERSION,
                found: row.schema_version,
            });
        }
        Ok(row)
    }

    fn decode_shared_instance(bytes: IVec) -> Result<SharedInstanceRow, LockoutError> {
        let row: SharedInstanceRow = bincode::deserialize(&bytes)?;
        if row.schema_version != SHARED_INSTANCE_SCHEMA_VERSION {
            return Err(LockoutError::SchemaMismatch {
                entity: "shared_instance",
                expected: SHARED_INSTANCE_SCHEMA_VERSION,
                found: row.schema_version,
            });
        }
        Ok(row)
    }

    /// All shared instance rows.
    pub fn load_shared_instances(&self) -> Result<Vec<SharedInstanceRow>, LockoutError> {
        self.instances
            .iter()
            .map(|entry| {
                entry
                    .map_err(LockoutError::from)
                    .and_then(|(_key, value)| Self::decode_shared_instance(value))
            })
            .collect()
    }

    /// All player lock rows.
    pub fn load_player_locks(&self) -> Result<Vec<PlayerLockRow>, LockoutError> {
        self.player_locks
            .scan_prefix(PLAYER_LOCK_PREFIX)
            .map(|entry| {
                entry
                    .map_err(LockoutError::from)
                    .and_then(|(_key, value)| Self::decode_player_lock(value))
            })
            .collect()
    }

    pub fn player_lock(
        &self,
        player: PlayerGuid,
        map_id: u32,
        lock_id: u32,
    ) -> Result<Option<PlayerLockRow>, LockoutError> {
        let key = Self::player_lock_key(player, map_id, lock_id);
        self.player_locks
            .get(key)?
            .map(Self::decode_player_lock)
            .transpose()
    }

    pub fn shared_instance(&self, instance_id: u32) -> Result<Option<SharedInstanceRow>, LockoutError> {
        self.instances
            .get(Self::instance_key(instance_id))?
            .map(Self::decode_shared_instance)
            .transpose()
    }

    /// Remove every player lock row pointing at `instance_id`. Returns the number removed.
    pub fn delete_player_locks_for_instance(&self, instance_id: u32) -> Result<usize, LockoutError> {
        let mut doomed = Vec::new();
        for entry in self.player_locks.scan_prefix(PLAYER_LOCK_PREFIX) {
            let (key, value) = entry?;
            if Self::decode_player_lock(value)?.instance_id == instance_id {
                doomed.push(key);
            }
        }
        for key in &doomed {
            self.player_locks.remove(key)?;
        }
        self.player_locks.flush()?;
        Ok(doomed.len())
    }

    pub fn delete_shared_instance(&self, instance_id: u32) -> Result<(), LockoutError> {
        self.instances.remove(Self::instance_key(instance_id))?;
        self.instances.flush()?;
        Ok(())
    }

    /// Toggle the extension flag of a stored lock. Returns false when no row exists.
    pub fn update_extension(
        &self,
        player: PlayerGuid,
        map_id: u32,
        lock_id: u32,
        extended: bool,
    ) -> Result<bool, LockoutError> {
        let key = Self::player_lock_key(player, map_id, lock_id);
        let Some(bytes) = self.player_locks.get(&key)? else {
            return Ok(false);
        };
        let mut row = Self::decode_player_lock(bytes)?;
        row.extended = extended;
        self.player_locks.insert(key, Self::serialize(&row)?)?;
        self.player_locks.flush()?;
        Ok(true)
    }

    fn prepare(statement: &LockStatement) -> Result<PreparedOp, LockoutError> {
        Ok(match statement {
            LockStatement::DeletePlayerLock {
                player,
                map_id,
                lock_id,
            } => PreparedOp::Remove(
                TreeId::PlayerLocks,
                Self::player_lock_key(*player, *map_id, *lock_id),
            ),
            LockStatement::InsertPlayerLock(row) => {
                let mut row = row.clone();
                row.schema_version = PLAYER_LOCK_SCHEMA_VERSION;
                PreparedOp::Put(
                    TreeId::PlayerLocks,
                    Self::player_lock_key(row.player, row.map_id, row.lock_id),
                    Self::serialize(&row)?,
                )
            }
            LockStatement::DeleteSharedInstance { instance_id } => {
                PreparedOp::Remove(TreeId::Instances, Self::instance_key(*instance_id))
            }
            LockStatement::InsertSharedInstance(row) => {
                let mut row = row.clone();
                row.schema_version = SHARED_INSTANCE_SCHEMA_VERSION;
                PreparedOp::Put(
                    TreeId::Instances,
                    Self::instance_key(row.instance_id),
                    Self::serialize(&row)?,
                )
            }
        })
    }

    /// Apply every statement of `transaction` atomically, in order.
    pub fn commit(&self, transaction: LockTransaction) -> Result<(), LockoutError> {
        if transaction.is_empty() {
            return Ok(());
        }

        let ops = transaction
            .statements
            .iter()
            .map(Self::prepare)
            .collect::<Result<Vec<_>, _>>()?;

        let result: Result<(), TransactionError<()>> = (&self.player_locks, &self.instances)
            .transaction(|(player_locks, instances)| {
                for op in &ops {
                    match op {
                        PreparedOp::Put(tree, key, value) => {
                            let target = match tree {
                                TreeId::PlayerLocks => player_locks,
                                TreeId::Instances => instances,
                            };
                            target.insert(key.as_slice(), value.as_slice())?;
                        }
                        PreparedOp::Remove(tree, key) => {
                            let target = match tree {
                                TreeId::PlayerLocks => player_locks,
                                TreeId::Instances => instances,
                            };
                            target.remove(key.as_slice())?;
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(LockoutError::TransactionAborted(format!(
                    "{} statements",
                    ops.len()
                )))
            }
            Err(TransactionError::Storage(err)) => return Err(LockoutError::Sled(err)),
        }

        self.player_locks.flush()?;
        self.instances.flush()?;
        Ok(())
    }
}
