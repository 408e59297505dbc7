//! Data types passed between the stages and to the front-end.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use leech_protocol::{MediaKind, OwnerId, TaskId, TaskState};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// A resource opened by a [`Resolver`](crate::Resolver), ready to stream.
pub struct Resolved {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Size announced by the source; `0` when unknown.
    pub advertised_size: u64,
    /// File name proposed by the source (sanitized before use).
    pub suggested_name: String,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("advertised_size", &self.advertised_size)
            .field("suggested_name", &self.suggested_name)
            .finish_non_exhaustive()
    }
}

/// A file the fetch stage wrote to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub path: PathBuf,
    pub name: String,
    pub bytes: u64,
}

/// One part handed to a [`Sink`](crate::Sink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub caption: String,
    pub kind: MediaKind,
    /// 1-based.
    pub part: usize,
    pub parts: usize,
}

/// What the relay stage delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySummary {
    pub parts_sent: usize,
    /// Attempts used by each part, in relay order.
    pub attempts_per_part: Vec<u32>,
    /// Back-off delays taken across all parts.
    pub backoffs: u32,
    pub bytes_sent: u64,
}

/// Final result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(RelaySummary),
    Cancelled,
    /// Short cause, suitable for showing to the user.
    Failed(String),
}

impl Outcome {
    pub fn state(&self) -> TaskState {
        match self {
            Outcome::Completed(_) => TaskState::Completed,
            Outcome::Cancelled => TaskState::Cancelled,
            Outcome::Failed(_) => TaskState::Failed,
        }
    }
}

/// Event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task reached a terminal state. Sent exactly once per task, after
    /// its artifacts were deleted and it left the registry.
    Finished {
        id: TaskId,
        owner: OwnerId,
        outcome: Outcome,
    },
}

/// Observability snapshot written to a [`TaskMirror`](crate::TaskMirror).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorRecord {
    pub task_id: TaskId,
    pub owner: OwnerId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_progress_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}
