//! Configuration file support for Tally.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/tally/config.toml`.

use crate::streak::DEFAULT_MAX_SCAN_DAYS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub streak: StreakConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Ledger behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Mutations of a habit after which a month-clear can no longer be undone
    #[serde(default = "default_undo_window")]
    pub undo_window: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            undo_window: default_undo_window(),
        }
    }
}

/// Streak calculation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Upper bound on the current-streak backward scan
    #[serde(default = "default_max_scan_days")]
    pub max_scan_days: u32,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            max_scan_days: default_max_scan_days(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
}

fn default_undo_window() -> u32 {
    5
}

fn default_max_scan_days() -> u32 {
    DEFAULT_MAX_SCAN_DAYS
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ledger.undo_window == 0 {
            return Err(Error::Config(
                "ledger.undo_window must be at least 1".into(),
            ));
        }
        if self.streak.max_scan_days == 0 {
            return Err(Error::Config(
                "streak.max_scan_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally")
            .join("config.toml")
    }
}
