//! Node configuration loading and management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use commons_core::EngineConfig;

/// Full configuration for the Commons node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Background maintenance intervals.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Store, verification, sync and trust graph settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Path to the log signing key. Ephemeral when unset.
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between expiry cleanups.
    #[serde(default = "default_expiry_secs")]
    pub expiry_interval_secs: u64,
    /// Seconds between pending-sync retry passes.
    #[serde(default = "default_sync_retry_secs")]
    pub sync_retry_interval_secs: u64,
    /// Seconds between re-verification passes.
    #[serde(default = "default_verify_secs")]
    pub verify_interval_secs: u64,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_expiry_secs() -> u64 {
    3600
}
fn default_sync_retry_secs() -> u64 {
    30
}
fn default_verify_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: default_expiry_secs(),
            sync_retry_interval_secs: default_sync_retry_secs(),
            verify_interval_secs: default_verify_secs(),
        }
    }
}

impl MaintenanceConfig {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }

    pub fn sync_retry_interval(&self) -> Duration {
        Duration::from_secs(self.sync_retry_interval_secs.max(1))
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs.max(1))
    }
}

impl NodeConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };
        config.engine.validate()?;
        Ok(config)
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Directory of the RocksDB record database.
    pub fn records_path(&self) -> PathBuf {
        self.storage.data_dir.join("records")
    }
}
