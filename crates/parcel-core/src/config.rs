//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/parcel/config.toml)
//! 3. Environment variables (PARCEL_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::{PlaceholderPolicy, SyncPolicy};

/// Environment variable prefix
const ENV_PREFIX: &str = "PARCEL";

/// Default base URL of the delivery API
const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote delivery API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Address sync settings
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Tunables for the address sync subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Whether delivered addresses are pushed to the API at all
    pub enabled: bool,
    /// Hard timeout for a single API call
    pub request_timeout_secs: u64,
    /// Pause after reconnecting before the queue is drained
    pub settle_delay_secs: u64,
    /// Connectivity reconciliation poll interval
    pub poll_interval_secs: u64,
    /// Failed attempts after which a record is given up
    pub max_retries: u32,
    /// How long synced records are kept before purging
    pub retention_days: u32,
    /// Keep address-less placeholders pending for this long.
    /// Unset means they are dropped on the first drain that sees them.
    pub placeholder_max_age_secs: Option<u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout_secs: 10,
            settle_delay_secs: 2,
            poll_interval_secs: 5,
            max_retries: 5,
            retention_days: 7,
            placeholder_max_age_secs: None,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Build the coordinator policy from these settings
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_retries: self.max_retries,
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            retention: chrono::Duration::days(i64::from(self.retention_days)),
            placeholders: match self.placeholder_max_age_secs {
                Some(secs) => PlaceholderPolicy::HoldFor(Duration::from_secs(secs)),
                None => PlaceholderPolicy::DropImmediately,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: default_api_url(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PARCEL_DATA_DIR, PARCEL_API_URL, PARCEL_SYNC_ENABLED)
    /// 2. Config file (~/.config/parcel/config.toml or PARCEL_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string falls back to the default endpoint
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = if val.is_empty() {
                default_api_url()
            } else {
                val
            };
        }

        if let Ok(val) = std::env::var(format!("{}_SYNC_ENABLED", ENV_PREFIX)) {
            self.sync.enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PARCEL_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parcel")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("parcel.db")
    }

    /// Full URL of the delivery endpoint
    pub fn delivery_endpoint(&self) -> String {
        format!("{}/delivery", self.api_url.trim_end_matches('/'))
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parcel")
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
