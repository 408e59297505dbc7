//! Engine error types.

use std::path::PathBuf;

use leech_protocol::{OwnerId, TaskId, TransportError};
use leech_transfer::SplitError;

/// Errors returned by the task registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id} does not belong to {owner}")]
    NotOwner { id: TaskId, owner: OwnerId },

    #[error("owner {owner} already has {limit} active tasks")]
    OwnerLimit { owner: OwnerId, limit: usize },
}

/// Errors produced while fetching a resource to local storage.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("fetched file is empty")]
    EmptyResult,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while relaying parts to the destination.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("giving up after {attempts} attempts: {last_cause}")]
    RetriesExhausted {
        attempts: u32,
        last_cause: TransportError,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("part file missing: {}", .0.display())]
    MissingPart(PathBuf),
}

/// Failure of a whole pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("split failed: {0}")]
    Split(#[from] SplitError),

    #[error("relay failed: {0}")]
    Relay(#[from] RelayError),

    #[error("cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Join(String),

    #[error("internal error: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Returns `true` for every cancellation variant, whichever stage saw it.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Fetch(FetchError::Cancelled)
                | PipelineError::Relay(RelayError::Cancelled)
        )
    }
}
