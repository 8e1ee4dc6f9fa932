//! Binary entrypoint for the Lockwarden CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and sample `catalog.toml`
//! - `status` - load all persisted locks and print a summary
//! - `locks <player> [--json]` - list a player's instance locks
//! - `next-reset --map <id> --difficulty <id>` - show the next scheduled reset
//! - `extend <player> --map <id> --difficulty <id> [--disable]` - toggle lock extension
//!
//! See the library crate docs for module-level details: `lockwarden::`.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use lockwarden::config::Config;
use lockwarden::lockout::{
    InstanceIdAllocator, InstanceLockRegistry, LockStore, MapCatalog, PlayerGuid,
    ResetScheduler, SystemClock,
};

#[derive(Parser)]
#[command(name = "lockwarden")]
#[command(about = "Instance lockout registry for dungeon and raid resets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and sample catalog
    Init,
    /// Load persisted locks and print a summary
    Status,
    /// List a player's instance locks
    Locks {
        /// Player guid counter
        player: u64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show when the next reset for a map difficulty happens
    NextReset {
        #[arg(short, long)]
        map: u32,
        #[arg(short, long)]
        difficulty: u8,
    },
    /// Extend (or stop extending) a player's lock past the next reset
    Extend {
        /// Player guid counter
        player: u64,
        #[arg(short, long)]
        map: u32,
        #[arg(short, long)]
        difficulty: u8,
        /// Clear the extension instead of setting it
        #[arg(long)]
        disable: bool,
    },
}

#[derive(Serialize)]
struct LockSummary {
    map_id: u32,
    map: String,
    difficulty_id: u8,
    difficulty: String,
    instance_id: u32,
    expires_at: DateTime<Utc>,
    effective_expiry: DateTime<Utc>,
    extended: bool,
    completed_encounters: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init doesn't have a config yet
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            let config = Config::default();
            if tokio::fs::metadata(&config.catalog.path).await.is_ok() {
                warn!("Catalog {} already exists, leaving it untouched", config.catalog.path);
            } else {
                let catalog = MapCatalog::sample().to_toml_string()?;
                tokio::fs::write(&config.catalog.path, catalog).await?;
            }
            println!("Wrote {} and {}", cli.config, config.catalog.path);
        }
        Commands::Status => {
            let config = require_config(pre_config, &cli.config)?;
            let catalog = MapCatalog::load(&config.catalog.path).await?;
            let (mut registry, allocator) = open_registry(&config, &catalog)?;
            let stats = registry.stats().clone();
            println!("Lockwarden v{}", env!("CARGO_PKG_VERSION"));
            println!("Database: {}", config.storage.lock_db_path());
            println!(
                "Reset schedule: daily at {:02}:00, weekly on {}",
                config.reset_schedule.daily_hour,
                weekday_name(config.reset_schedule.weekly_day)
            );
            println!("Players with locks: {}", registry.player_count());
            println!("Instance locks: {}", registry.permanent_lock_count());
            println!("Shared instances: {}", registry.shared_instance_count());
            println!("Reserved instance ids: {}", allocator.len());
            if stats.orphaned_rows_purged > 0 || stats.shared_records_released > 0 {
                println!(
                    "Cleanup: {} orphaned lock rows purged, {} unreferenced instances deleted",
                    stats.orphaned_rows_purged, stats.shared_records_released
                );
            }
            registry.unload();
        }
        Commands::Locks { player, json } => {
            let config = require_config(pre_config, &cli.config)?;
            let catalog = MapCatalog::load(&config.catalog.path).await?;
            let (mut registry, _) = open_registry(&config, &catalog)?;
            let player = PlayerGuid(player);

            let mut summaries = Vec::new();
            for lock in registry.locks_for_player(player) {
                let entries = catalog.entries(lock.map_id(), lock.difficulty_id())?;
                summaries.push(LockSummary {
                    map_id: lock.map_id(),
                    map: entries.map.name.clone(),
                    difficulty_id: lock.difficulty_id(),
                    difficulty: entries.map_difficulty.name.clone(),
                    instance_id: lock.instance_id(),
                    expires_at: lock.expiry_time(),
                    effective_expiry: registry.effective_expiry_time(lock, &entries),
                    extended: lock.is_extended(),
                    completed_encounters: registry.lock_data(lock).completed_encounters_mask,
                });
            }
            summaries.sort_by_key(|s| (s.map_id, s.difficulty_id));

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("{} has no instance locks", player);
            } else {
                for s in &summaries {
                    println!(
                        "{} ({}) instance {} | expires {} | encounters {:#b}{}",
                        s.map,
                        s.difficulty,
                        s.instance_id,
                        s.effective_expiry.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                        s.completed_encounters,
                        if s.extended { " | extended" } else { "" }
                    );
                }
            }
            registry.unload();
        }
        Commands::NextReset { map, difficulty } => {
            let config = require_config(pre_config, &cli.config)?;
            let catalog = MapCatalog::load(&config.catalog.path).await?;
            let entries = catalog.entries(map, difficulty)?;
            if !entries.has_reset_schedule() {
                println!("{} has no reset schedule", entries);
                return Ok(());
            }
            let scheduler = ResetScheduler::new(config.reset_schedule, Arc::new(SystemClock));
            let next = scheduler.next_reset_time(&entries);
            println!(
                "{} {} reset at {}",
                entries,
                entries.map_difficulty.reset_interval.description(),
                next.with_timezone(&Local).format("%Y-%m-%d %H:%M %Z")
            );
        }
        Commands::Extend {
            player,
            map,
            difficulty,
            disable,
        } => {
            let config = require_config(pre_config, &cli.config)?;
            let catalog = MapCatalog::load(&config.catalog.path).await?;
            let (mut registry, _) = open_registry(&config, &catalog)?;
            let entries = catalog.entries(map, difficulty)?;
            let player = PlayerGuid(player);
            if registry
                .find_active_lock(player, &entries, true, false)
                .is_none()
            {
                println!("{} has no lock for {}", player, entries);
            } else {
                registry.update_instance_lock_extension_for_player(player, &entries, !disable)?;
                info!("{} lock for {} extension set to {}", player, entries, !disable);
                println!(
                    "{} lock for {} is {} extended",
                    player,
                    entries,
                    if disable { "no longer" } else { "now" }
                );
            }
            registry.unload();
        }
    }

    Ok(())
}

fn require_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    pre_config.ok_or_else(|| anyhow!("Could not load config {} (run `lockwarden init` first)", path))
}

fn open_registry(
    config: &Config,
    catalog: &MapCatalog,
) -> Result<(InstanceLockRegistry, InstanceIdAllocator)> {
    let store = LockStore::open(config.storage.lock_db_path())?;
    let scheduler = ResetScheduler::new(config.reset_schedule, Arc::new(SystemClock));
    let mut registry = InstanceLockRegistry::new(store, scheduler);
    let mut allocator = InstanceIdAllocator::new();
    registry.load(catalog, &mut allocator)?;
    Ok((registry, allocator))
}

fn weekday_name(day: u32) -> &'static str {
    match day {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        _ => "?",
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file_sink = config.as_ref().and_then(|cfg| {
        let file = cfg.logging.file.as_ref()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    let audit_path = config.as_ref().and_then(|cfg| cfg.logging.audit_file.clone());

    if let Some(f) = file_sink {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs also echo to the console
        let is_tty = atty::is(atty::Stream::Stdout);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if record.target() == "audit" {
                if let Some(ref path) = audit_path {
                    if let Ok(mut af) = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                    {
                        let _ = writeln!(af, "{}", line);
                    }
                }
            }

            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
