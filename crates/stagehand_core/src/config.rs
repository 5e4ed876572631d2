//! Configuration for the intake engine.
//!
//! Loaded once from TOML and treated as immutable for the run; changing any
//! of these requires a restart.

use crate::error::{Result, StageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for watching and staging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Folders scanned/watched for incoming files
    #[serde(default)]
    pub watched_folders: Vec<PathBuf>,

    /// Destination directory for the archive action
    #[serde(default = "default_archive_folder")]
    pub archive_folder: PathBuf,

    /// Polling interval in seconds (the correctness backstop for missed
    /// notifications)
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: f64,

    /// Quiet time a path must show before it is considered fully written
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: f64,

    /// Watch subfolders too
    #[serde(default)]
    pub recursive: bool,

    /// Include dotfiles when scanning and watching
    #[serde(default)]
    pub include_hidden: bool,

    /// Follow symlinks during recursive scans
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Path to the ledger database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_archive_folder() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("StagehandArchive")
}

fn default_poll_seconds() -> f64 {
    2.0
}

fn default_settle_seconds() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    stagehand_home().join("stagehand.sqlite3")
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watched_folders: Vec::new(),
            archive_folder: default_archive_folder(),
            poll_seconds: default_poll_seconds(),
            settle_seconds: default_settle_seconds(),
            recursive: false,
            include_hidden: false,
            follow_symlinks: false,
            database_path: default_database_path(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: WatchConfig =
            toml::from_str(&content).map_err(|e| StageError::Config(e.to_string()))?;

        config.watched_folders = config
            .watched_folders
            .iter()
            .map(|p| expand_tilde(p))
            .collect();
        config.archive_folder = expand_tilde(&config.archive_folder);
        config.database_path = expand_tilde(&config.database_path);

        // STAGEHAND_DB points tooling at an alternate ledger without
        // touching the config file.
        if let Ok(db_override) = std::env::var("STAGEHAND_DB") {
            config.database_path = PathBuf::from(db_override);
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StageError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.poll_seconds.is_finite() || self.poll_seconds <= 0.0 {
            return Err(StageError::Config(format!(
                "poll_seconds must be positive, got {}",
                self.poll_seconds
            )));
        }
        if !self.settle_seconds.is_finite() || self.settle_seconds < 0.0 {
            return Err(StageError::Config(format!(
                "settle_seconds must be non-negative, got {}",
                self.settle_seconds
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_seconds)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.settle_seconds)
    }
}

/// Stagehand home directory: `$STAGEHAND_HOME` or `~/.stagehand`.
pub fn stagehand_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("STAGEHAND_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stagehand")
}

/// Config file location: `$STAGEHAND_CONFIG` or `<home>/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(override_path) = std::env::var("STAGEHAND_CONFIG") {
        return PathBuf::from(override_path);
    }
    stagehand_home().join("config.toml")
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = s.strip_prefix("~/") {
        return dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest);
    }
    path.to_path_buf()
}
