//! leechd configuration management.
//!
//! Configuration is stored as TOML at `~/.config/leechd/config.toml`, or at
//! the path named by `LEECHD_CONFIG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use leech_engine::{EngineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "LEECHD_CONFIG";
const MIB: u64 = 1024 * 1024;

/// leechd configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the per-task working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Where the directory sink delivers parts (`<outbox>/<chat>/`).
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,

    /// JSON-lines task mirror. Empty disables mirroring.
    #[serde(default = "default_mirror_path")]
    pub mirror_path: PathBuf,

    /// Principal that console commands act as.
    #[serde(default)]
    pub owner: i64,

    /// Chat that receives the parts.
    #[serde(default)]
    pub chat: i64,

    /// Largest part the sink accepts, in MiB.
    #[serde(default = "default_max_part_size_mib")]
    pub max_part_size_mib: u64,

    /// Minimum gap between progress notifications, in seconds.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Fetch buffer size in KiB.
    #[serde(default = "default_read_buffer_kib")]
    pub read_buffer_kib: usize,

    /// Attempts per part, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between failed attempts, in seconds.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Concurrent tasks per owner (0 = unlimited).
    #[serde(default)]
    pub max_tasks_per_owner: usize,
}

fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".local").join("share").join("leechd")
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("leechd")
}

fn default_outbox_dir() -> PathBuf {
    data_dir().join("outbox")
}

fn default_mirror_path() -> PathBuf {
    data_dir().join("tasks.jsonl")
}

fn default_max_part_size_mib() -> u64 {
    1900
}

fn default_progress_interval_secs() -> u64 {
    3
}

fn default_read_buffer_kib() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            outbox_dir: default_outbox_dir(),
            mirror_path: default_mirror_path(),
            owner: 0,
            chat: 0,
            max_part_size_mib: default_max_part_size_mib(),
            progress_interval_secs: default_progress_interval_secs(),
            read_buffer_kib: default_read_buffer_kib(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            max_tasks_per_owner: 0,
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_part_size_mib == 0 {
            anyhow::bail!("max_part_size_mib must be greater than zero");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.read_buffer_kib == 0 {
            anyhow::bail!("read_buffer_kib must be greater than zero");
        }
        Ok(())
    }

    /// Engine settings derived from this file.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            work_dir: self.work_dir.clone(),
            max_part_size: self.max_part_size_mib * MIB,
            progress_interval: Duration::from_secs(self.progress_interval_secs),
            read_buffer_size: self.read_buffer_kib * 1024,
            relay: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: Duration::from_secs(self.backoff_secs),
            },
            max_tasks_per_owner: (self.max_tasks_per_owner > 0).then_some(self.max_tasks_per_owner),
        }
    }

    /// `None` when mirroring is disabled.
    pub fn mirror_path(&self) -> Option<&Path> {
        (!self.mirror_path.as_os_str().is_empty()).then_some(self.mirror_path.as_path())
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("leechd")
        .join("config.toml")
}
