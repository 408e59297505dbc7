//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use leech_transfer::DEFAULT_MAX_PART_SIZE;

/// Default minimum gap between two progress notifications.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// Default fetch buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Retry policy for sending a single part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per part, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between a failed attempt and the next one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Settings shared by every task the engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root of the per-owner, per-task working directories.
    pub work_dir: PathBuf,
    /// Largest part the destination accepts.
    pub max_part_size: u64,
    pub progress_interval: Duration,
    pub read_buffer_size: usize,
    pub relay: RetryPolicy,
    /// Concurrent task cap per owner; `None` means unlimited.
    pub max_tasks_per_owner: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("leechd"),
            max_part_size: DEFAULT_MAX_PART_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            relay: RetryPolicy::default(),
            max_tasks_per_owner: None,
        }
    }
}
