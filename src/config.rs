//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! - Default values
//! - TOML configuration file (`~/.fitwatch/config.toml` unless overridden)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FITWATCH_` and use double
//! underscores to separate nested levels:
//! - `FITWATCH_DISPATCH__MAX_RETRIES=5` sets `dispatch.max_retries`
//! - `FITWATCH_INTERVALS__API_KEY=...` sets `intervals.api_key`
//! - `FITWATCH_WATCH__SETTLE_MS=250` sets `watch.settle_ms`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::destination::INTERVALS_DEFAULT_BASE_URL;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to write configuration to {path}: {cause}")]
    Save { path: PathBuf, cause: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory monitoring
    #[serde(default)]
    pub watch: WatchConfig,

    /// Ledger database location (defaults to ~/.fitwatch/fitwatch.db)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Delivery retry policy
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Intervals.icu destination
    #[serde(default)]
    pub intervals: IntervalsConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Directories to monitor; a leading `~` expands to the home directory
    #[serde(default = "default_watch_dirs")]
    pub dirs: Vec<PathBuf>,

    /// File extension to pick up, case-insensitive, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Quiet period after the last event before a file is handed on
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Extra attempts after the first failed push
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Failed records at or above this many recorded failures are left alone by the retry sweep
    #[serde(default = "default_sweep_max_retries")]
    pub sweep_max_retries: u32,

    /// Run a retry sweep before scanning on startup
    #[serde(default = "default_true")]
    pub retry_on_startup: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IntervalsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub athlete_id: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_intervals_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `fitwatch::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_extension() -> String {
    "fit".to_string()
}
fn default_settle_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_sweep_max_retries() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_intervals_base_url() -> String {
    INTERVALS_DEFAULT_BASE_URL.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Platform-specific activity folders.
pub fn default_watch_dirs() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    let zwift = home.join("Documents").join("Zwift").join("Activities");

    if cfg!(target_os = "linux") {
        vec![
            zwift,
            home.join(".local").join("share").join("Zwift").join("Activities"),
        ]
    } else {
        vec![zwift, home.join("Documents").join("TrainerRoad")]
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            store_path: None,
            dispatch: DispatchConfig::default(),
            intervals: IntervalsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dirs: default_watch_dirs(),
            extension: default_extension(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            sweep_max_retries: default_sweep_max_retries(),
            retry_on_startup: true,
        }
    }
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            athlete_id: String::new(),
            api_key: String::new(),
            base_url: default_intervals_base_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl WatchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Settings {
    /// Default config file location.
    pub fn default_config_path() -> PathBuf {
        fitwatch_home().join("config.toml")
    }

    /// Default ledger location.
    pub fn default_store_path() -> PathBuf {
        fitwatch_home().join("fitwatch.db")
    }

    /// Effective ledger location.
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(Self::default_store_path)
    }

    /// Load configuration from a specific file, layered over defaults and
    /// under environment variables.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels; single underscores
            // stay inside field names.
            .merge(Env::prefixed("FITWATCH_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(|e| SettingsError::Load(Box::new(e)))
    }

    /// Load from `path`, writing a default file first if none exists.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            Settings::default().save(path)?;
            crate::log_event!("config", "created", "{}", path.display());
        }
        Self::load_from(path)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let save_err = |cause: String| SettingsError::Save {
            path: path.to_path_buf(),
            cause,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| save_err(e.to_string()))?;
            }
        }
        let toml_string = toml::to_string_pretty(self).map_err(|e| save_err(e.to_string()))?;
        std::fs::write(path, toml_string).map_err(|e| save_err(e.to_string()))?;
        Ok(())
    }

    /// Check values that would make startup pointless.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.watch.extension.trim_start_matches('.').trim().is_empty() {
            return Err(SettingsError::Invalid(
                "watch.extension must not be empty".to_string(),
            ));
        }
        if self.dispatch.base_delay_ms > self.dispatch.max_delay_ms {
            return Err(SettingsError::Invalid(format!(
                "dispatch.base_delay_ms ({}) exceeds dispatch.max_delay_ms ({})",
                self.dispatch.base_delay_ms, self.dispatch.max_delay_ms
            )));
        }
        if self.intervals.enabled {
            if self.intervals.athlete_id.is_empty() {
                return Err(SettingsError::Invalid(
                    "intervals.athlete_id is required when intervals is enabled".to_string(),
                ));
            }
            if self.intervals.api_key.is_empty() {
                return Err(SettingsError::Invalid(
                    "intervals.api_key is required when intervals is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn fitwatch_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fitwatch")
}
