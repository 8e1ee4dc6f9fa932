//! # Lockwarden - Instance Lockouts for Group Content
//!
//! Lockwarden keeps track of which players are saved to which dungeon and raid
//! instances, and until when. A lock binds a player to an instance's progress
//! until the next scheduled reset; players saved to the same instance share one
//! progress record.
//!
//! ## Features
//!
//! - **Reset Calendar**: Daily and weekly resets on a configurable hour and weekday.
//! - **Temporary Locks**: Entering a fresh instance stages a lock that only becomes
//!   permanent once the player makes progress.
//! - **Shared Progress**: Instance-bound maps share one reference-counted record per
//!   instance, deleted automatically when no lock references it.
//! - **Extensions**: An extended lock rides through one missed reset.
//! - **Admission Checks**: Classic instance-id lockouts and flex-locking by encounter progress.
//! - **Persistence**: Sled-backed rows written through caller-owned transactions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lockwarden::config::Config;
//! use lockwarden::lockout::{
//!     InstanceIdAllocator, InstanceLockRegistry, LockStore, MapCatalog, ResetScheduler,
//!     SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let catalog = MapCatalog::load(&config.catalog.path).await?;
//!     let store = LockStore::open(config.storage.lock_db_path())?;
//!     let scheduler = ResetScheduler::new(config.reset_schedule, Arc::new(SystemClock));
//!
//!     let mut registry = InstanceLockRegistry::new(store, scheduler);
//!     let mut allocator = InstanceIdAllocator::new();
//!     registry.load(&catalog, &mut allocator)?;
//!     // ... drive the registry from the server update loop ...
//!     registry.unload();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`lockout`] - Lock entities, shared progress, reset calendar, registry and storage
//! - [`config`] - Configuration management and validation

pub mod config;
pub mod lockout;
