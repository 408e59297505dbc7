//! Capabilities the engine consumes from its collaborators.
//!
//! The front-end implements these traits on top of the real network
//! clients. Using traits keeps the pipeline decoupled from transport and
//! testable with mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use leech_protocol::{ChatRef, MessageRef, NotifyError, Source, TaskId, TransportError};

use crate::error::FetchError;
use crate::types::{Attachment, MirrorRecord, Resolved};

/// Turns a source descriptor into a readable stream.
pub trait Resolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        source: &'a Source,
    ) -> Pin<Box<dyn Future<Output = Result<Resolved, FetchError>> + Send + 'a>>;
}

/// Delivers a local file to a chat.
pub trait Sink: Send + Sync {
    /// Sends one attachment. `on_progress(sent, total)` may be called any
    /// number of times while the file is being transmitted.
    fn send<'a>(
        &'a self,
        chat: ChatRef,
        attachment: &'a Attachment,
        on_progress: &'a (dyn Fn(u64, u64) + Send + Sync),
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;
}

/// Edits the status message of a task.
pub trait Notifier: Send + Sync {
    fn emit(
        &self,
        target: MessageRef,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// Write-only store that mirrors task progress for observability.
///
/// The engine never reads it back; failures are logged and ignored.
pub trait TaskMirror: Send + Sync {
    fn record(
        &self,
        record: MirrorRecord,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>>;
}

/// In-memory [`TaskMirror`] that keeps every record.
#[derive(Default)]
pub struct MemoryMirror {
    records: Mutex<Vec<MirrorRecord>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, in arrival order.
    pub fn records(&self) -> Vec<MirrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent record of a task.
    pub fn latest(&self, id: TaskId) -> Option<MirrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.task_id == id)
            .cloned()
    }
}

impl TaskMirror for MemoryMirror {
    fn record(
        &self,
        record: MirrorRecord,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record);
            Ok(())
        })
    }
}
