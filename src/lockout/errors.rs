use thiserror::Error;

/// Errors that can arise while loading reference data or talking to the lock store.
///
/// Broken registry invariants are not represented here: those are logic bugs and
/// abort the current operation with a panic instead of being handed back to callers.
#[derive(Debug, Error)]
pub enum LockoutError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, catalog files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file could not be parsed.
    #[error("catalog parse error: {0}")]
    CatalogParse(#[from] toml::de::Error),

    /// Returned when deserializing a row with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// The reference-data catalog has no entry for this map/difficulty pair.
    #[error("unknown map difficulty: map {map_id} difficulty {difficulty_id}")]
    UnknownMapDifficulty { map_id: u32, difficulty_id: u8 },

    /// Catalog contents failed validation.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A multi-tree transaction was aborted.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
}
