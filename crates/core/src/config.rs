//! Configuration module for KeyRelay.
//!
//! Resolves the platform data directory and loads `config.json` from it.
//! A missing or unreadable file yields [`AppConfig::default`]; the mapping
//! store (`keymappings.json`) and the log file live in the same directory
//! (%APPDATA%/KeyRelay/ on Windows).
//!
//! # Example
//!
//! ```no_run
//! use keyrelay_core::config::{load_config, save_config};
//!
//! let mut config = load_config();
//! config.debounce_floor_ms = 15;
//! save_config(&config).expect("Failed to save config");
//! ```

use crate::registry::MAPPINGS_FILE;
use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the application config
pub const CONFIG_FILE: &str = "config.json";

/// File name of the log written by the binary
pub const LOG_FILE: &str = "keyrelay.log";

/// How trigger firings on different keys are scheduled
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One playback at a time across all triggers
    #[default]
    Serialised,
    /// Each firing runs on its own worker; same-key re-entry is still refused
    Concurrent,
}

/// Application configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Minimum interval between two trigger firings (any keys)
    pub debounce_floor_ms: u64,
    pub dispatch_mode: DispatchMode,
    /// Capacity of the hook -> dispatcher channel
    pub hook_buffer_size: usize,
    /// Pause before the first keystroke of a macro run
    pub macro_grace_ms: u64,
    /// Default tracing level when RUST_LOG is unset
    pub log_level: String,
    /// Deliver macro notifications
    pub notifications: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            debounce_floor_ms: 10,
            dispatch_mode: DispatchMode::Serialised,
            hook_buffer_size: 256,
            macro_grace_ms: 300,
            log_level: "info".to_string(),
            notifications: true,
        }
    }
}

impl AppConfig {
    pub fn debounce_floor(&self) -> Duration {
        Duration::from_millis(self.debounce_floor_ms)
    }

    pub fn macro_grace(&self) -> Duration {
        Duration::from_millis(self.macro_grace_ms)
    }
}

/// Get the application's data directory
/// Returns %APPDATA%/KeyRelay/ on Windows
/// Creates directory if it doesn't exist
pub fn get_data_directory() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "KeyRelay")
        .ok_or_else(|| anyhow!("Failed to determine user data directory"))?;

    let data_dir = project_dirs.data_dir();
    ensure_directory(data_dir)?;
    Ok(data_dir.to_path_buf())
}

/// Create `dir` (and parents) if missing
pub fn ensure_directory(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| anyhow!("Failed to create data directory: {}", e))
}

pub fn mappings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MAPPINGS_FILE)
}

pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE)
}

/// Load application configuration from the default data directory
pub fn load_config() -> AppConfig {
    match get_data_directory() {
        Ok(dir) => load_config_from(&dir),
        Err(_) => AppConfig::default(),
    }
}

/// Load `config.json` from `data_dir`, falling back to defaults
pub fn load_config_from(data_dir: &Path) -> AppConfig {
    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return AppConfig::default();
    }

    let Ok(contents) = fs::read_to_string(&config_path) else {
        return AppConfig::default();
    };

    serde_json::from_str(&contents).unwrap_or_default()
}

/// Save configuration to the default data directory
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(&get_data_directory()?, config)
}

pub fn save_config_to(data_dir: &Path, config: &AppConfig) -> Result<()> {
    ensure_directory(data_dir)?;
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
    fs::write(data_dir.join(CONFIG_FILE), json)
        .map_err(|e| anyhow!("Failed to write config file: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.debounce_floor(), Duration::from_millis(10));
        assert_eq!(config.dispatch_mode, DispatchMode::Serialised);
        assert_eq!(config.hook_buffer_size, 256);
        assert_eq!(config.macro_grace(), Duration::from_millis(300));
    }

    #[test]
    fn test_missing_and_malformed_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config_from(dir.path()), AppConfig::default());

        fs::write(dir.path().join(CONFIG_FILE), "not json").unwrap();
        assert_eq!(load_config_from(dir.path()), AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"dispatch_mode": "concurrent", "debounce_floor_ms": 25}"#,
        )
        .unwrap();

        let config = load_config_from(dir.path());
        assert_eq!(config.dispatch_mode, DispatchMode::Concurrent);
        assert_eq!(config.debounce_floor_ms, 25);
        assert_eq!(config.hook_buffer_size, 256);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let config = AppConfig {
            notifications: false,
            ..AppConfig::default()
        };
        save_config_to(&nested, &config).unwrap();
        assert_eq!(load_config_from(&nested), config);
        assert_eq!(mappings_path(&nested), nested.join("keymappings.json"));
    }
}
