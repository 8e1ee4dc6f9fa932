//! # Configuration Management Module
//!
//! Lockwarden reads a single TOML file describing where lock rows live, where the
//! reference-data catalog is, how the reset calendar is laid out and how logging
//! is routed.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - Sled database location
//! - [`CatalogConfig`] - Map/difficulty/encounter catalog file
//! - [`ResetScheduleConfig`] - Daily reset hour and weekly reset weekday
//! - [`LoggingConfig`] - Log level, log file and audit file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//!
//! [catalog]
//! path = "catalog.toml"
//!
//! [reset_schedule]
//! daily_hour = 9
//! weekly_day = 2   # 0 = Sunday
//!
//! [logging]
//! level = "info"
//! file = "lockwarden.log"
//! audit_file = "lockwarden-audit.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub reset_schedule: ResetScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Optional override for the lock database path; defaults to `<data_dir>/locks`.
    #[serde(default)]
    pub db_path: Option<String>,
}

impl StorageConfig {
    pub fn lock_db_path(&self) -> String {
        self.db_path
            .clone()
            .unwrap_or_else(|| format!("{}/locks", self.data_dir.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: "catalog.toml".to_string(),
        }
    }
}

/// When scheduled resets happen, in server local time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetScheduleConfig {
    /// Hour of day (0-23) at which daily and weekly resets occur.
    #[serde(default = "default_daily_hour")]
    pub daily_hour: u32,
    /// Day of week for weekly resets, 0 = Sunday.
    #[serde(default = "default_weekly_day")]
    pub weekly_day: u32,
}

fn default_daily_hour() -> u32 {
    9
}

fn default_weekly_day() -> u32 {
    2
}

impl Default for ResetScheduleConfig {
    fn default() -> Self {
        Self {
            daily_hour: default_daily_hour(),
            weekly_day: default_weekly_day(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    /// Separate sink for encounter-completion audit records.
    #[serde(default)]
    pub audit_file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.reset_schedule.daily_hour >= 24 {
            return Err(anyhow!(
                "reset_schedule.daily_hour must be 0-23, got {}",
                self.reset_schedule.daily_hour
            ));
        }
        if self.reset_schedule.weekly_day >= 7 {
            return Err(anyhow!(
                "reset_schedule.weekly_day must be 0-6 (0 = Sunday), got {}",
                self.reset_schedule.weekly_day
            ));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                db_path: None,
            },
            catalog: CatalogConfig::default(),
            reset_schedule: ResetScheduleConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("lockwarden.log".to_string()),
                audit_file: Some("lockwarden-audit.log".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_schedule_defaults() {
        let config = ResetScheduleConfig::default();
        assert_eq!(config.daily_hour, 9);
        assert_eq!(config.weekly_day, 2);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let text = r#"
[storage]
data_dir = "/var/lib/lockwarden"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.reset_schedule, ResetScheduleConfig::default());
        assert_eq!(config.catalog.path, "catalog.toml");
        assert_eq!(config.storage.lock_db_path(), "/var/lib/lockwarden/locks");
        assert!(config.logging.audit_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_reset_schedule() {
        let text = r#"
[storage]
data_dir = "./data"

[reset_schedule]
daily_hour = 4

[logging]
level = "info"
"#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.reset_schedule.daily_hour, 4);
        assert_eq!(config.reset_schedule.weekly_day, 2);
    }

    #[test]
    fn test_validate_rejects_out_of_range_schedule() {
        let mut config = Config::default();
        config.reset_schedule.daily_hour = 24;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reset_schedule.weekly_day = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_db_path_override() {
        let storage = StorageConfig {
            data_dir: "./data/".to_string(),
            db_path: Some("/tmp/locks.sled".to_string()),
        };
        assert_eq!(storage.lock_db_path(), "/tmp/locks.sled");
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.reset_schedule, ResetScheduleConfig::default());
        assert_eq!(loaded.logging.file.as_deref(), Some("lockwarden.log"));
    }
}
