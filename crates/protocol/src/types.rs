use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OwnerId, TaskId};

/// What to fetch: a URL plus an optional format selector understood by the
/// resolver (ignored by plain HTTP resolvers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Lifecycle state of a task.
///
/// Transitions only move forward:
/// `Pending -> Fetching -> Splitting -> Relaying -> Completed | Cancelled | Failed`.
/// `Splitting` is skipped when the fetched file fits in one part, and a
/// terminal state may be entered from any non-terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Fetching,
    Splitting,
    Relaying,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }

    /// Returns `true` if moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: TaskState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Fetching => 1,
            TaskState::Splitting => 2,
            TaskState::Relaying => 3,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => 4,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Fetching => "fetching",
            TaskState::Splitting => "splitting",
            TaskState::Relaying => "relaying",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of a registered task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub owner: OwnerId,
    pub source: Source,
    pub state: TaskState,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

/// Which phase a progress sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum Stage {
    Downloading,
    Splitting,
    /// `part` is 1-based.
    Uploading { part: usize, parts: usize },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Downloading => f.write_str("Downloading"),
            Stage::Splitting => f.write_str("Splitting"),
            Stage::Uploading { parts: 1, .. } => f.write_str("Uploading"),
            Stage::Uploading { part, parts } => write!(f, "Uploading part {part}/{parts}"),
        }
    }
}

/// One `(current, total)` sample. `total == 0` means the size is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub stage: Stage,
    pub name: String,
    pub current: u64,
    pub total: u64,
}

impl Progress {
    /// Percentage in `0..=100`, or `None` when the total is unknown.
    pub fn percentage(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let pct = self.current as f64 / self.total as f64 * 100.0;
        Some(pct.min(100.0))
    }
}

/// How the destination should present a relayed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Streamable video message.
    Video,
    Document,
}
