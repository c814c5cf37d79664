//! Engine configuration in `~/.classplan/config.json`.
//!
//! Every field has a serde default, so a partial (or missing) file is fine.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

const CONFIG_DIR: &str = ".classplan";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Where the file-backed key-value store keeps guest schedules.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Autosave tick period. One tick counts as one second of countdown.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// How long "saved" stays visible after a save.
    #[serde(default = "default_saved_grace_seconds")]
    pub saved_grace_seconds: u32,
    #[serde(default = "default_guest_storage_key")]
    pub guest_storage_key: String,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join("data"))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("data"))
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_saved_grace_seconds() -> u32 {
    5
}

fn default_guest_storage_key() -> String {
    "guest-schedule".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tick_millis: default_tick_millis(),
            saved_grace_seconds: default_saved_grace_seconds(),
            guest_storage_key: default_guest_storage_key(),
        }
    }
}

impl SyncConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }
}

/// Get the canonical config file path (~/.classplan/config.json)
pub fn config_path() -> Result<PathBuf, SyncError> {
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::Configuration("Could not find home directory".into()))?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load configuration from ~/.classplan/config.json, or defaults if absent.
pub fn load_config() -> Result<SyncConfig, SyncError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<SyncConfig, SyncError> {
    if !path.exists() {
        log::debug!("No config at {}; using defaults", path.display());
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| SyncError::Configuration(format!("Failed to read config: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| SyncError::Configuration(format!("Failed to parse config: {}", e)))
}

pub fn save_config(config: &SyncConfig) -> Result<(), SyncError> {
    save_config_to(&config_path()?, config)
}

/// Write config atomically, creating the parent directory if needed.
pub fn save_config_to(path: &Path, config: &SyncConfig) -> Result<(), SyncError> {
    let parent = path.parent().ok_or_else(|| {
        SyncError::Configuration(format!("Invalid config path {}", path.display()))
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| SyncError::Configuration(format!("Failed to create config dir: {}", e)))?;

    let content = serde_json::to_string_pretty(config)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| SyncError::Configuration(format!("Failed to write config: {}", e)))?;
    Ok(())
}

/// Load, apply `mutator`, and write back.
pub fn create_or_update_config(
    path: &Path,
    mutator: impl FnOnce(&mut SyncConfig),
) -> Result<SyncConfig, SyncError> {
    let mut config = load_config_from(path)?;
    mutator(&mut config);
    save_config_to(path, &config)?;
    Ok(config)
}
