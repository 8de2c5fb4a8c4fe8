//! Configuration file management.
//!
//! `quill.toml` lives in the data directory (`$QUILL_DATA_DIR`, or
//! `~/.quill`). Every section is optional and falls back to defaults.

use std::path::{Path, PathBuf};

use quill_access::PricingPolicy;
use quill_exchange::ConverterConfig;
use quill_licensing::LicensingConfig;
use quill_payout::PayoutConfig;
use quill_revenue::SplitTable;
use quill_types::DAY_SECS;
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub exchange: ConverterConfig,
    #[serde(default)]
    pub pricing: PricingPolicy,
    #[serde(default)]
    pub revenue: RevenueConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
    #[serde(default)]
    pub licensing: LicensingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Data directory. Empty = `$QUILL_DATA_DIR` or `~/.quill`.
    #[serde(default)]
    pub data_dir: String,
    /// Socket file name inside the data directory.
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
}

/// Revenue split table, keyed by event type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevenueConfig {
    #[serde(default)]
    pub splits: SplitTable,
}

/// Periodic jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Length of a subscription pool period. Periods are aligned to
    /// multiples of this from the Unix epoch.
    #[serde(default = "default_pool_period_secs")]
    pub pool_period_secs: u64,
    /// How often the scheduler wakes up.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Queued distributions retried per tick.
    #[serde(default = "default_reconcile_batch")]
    pub reconcile_batch: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_socket_name() -> String {
    "quill.sock".to_string()
}

fn default_true() -> bool {
    true
}

fn default_pool_period_secs() -> u64 {
    DAY_SECS
}

fn default_tick_secs() -> u64 {
    300
}

fn default_reconcile_batch() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            socket_name: default_socket_name(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_period_secs: default_pool_period_secs(),
            tick_secs: default_tick_secs(),
            reconcile_batch: default_reconcile_batch(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = default_data_dir().join("quill.toml");
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a config document. Split tables are validated by
    /// deserialization; pricing and scheduler values are checked here.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.pricing.validate()?;
        if config.scheduler.pool_period_secs == 0 || config.scheduler.tick_secs == 0 {
            anyhow::bail!("scheduler periods must be positive");
        }
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.server.data_dir.is_empty() {
            default_data_dir()
        } else {
            PathBuf::from(&self.server.data_dir)
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join(&self.server.socket_name)
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("QUILL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".quill"))
        .unwrap_or_else(|_| PathBuf::from("/tmp/quill"))
}
