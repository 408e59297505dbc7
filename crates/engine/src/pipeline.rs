//! One task's run: fetch, optional split, relay, then cleanup.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::FutureExt;

use leech_protocol::{ChatRef, MessageRef, OwnerId, Progress, Source, Stage, TaskId, TaskState};
use leech_transfer::{human_bytes, split_file};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::PipelineError;
use crate::fetch::fetch;
use crate::ports::{Notifier, Resolver, Sink, TaskMirror};
use crate::registry::TaskRegistry;
use crate::relay::relay;
use crate::reporter::{ProgressReporter, ReportContext};
use crate::types::{Outcome, RelaySummary, TaskEvent};

/// Capabilities shared by all pipelines of one engine.
#[derive(Clone)]
pub(crate) struct Capabilities {
    pub resolver: Arc<dyn Resolver>,
    pub sink: Arc<dyn Sink>,
    pub notifier: Arc<dyn Notifier>,
    pub mirror: Option<Arc<dyn TaskMirror>>,
}

/// Everything one task needs to run to completion.
pub(crate) struct Pipeline {
    pub id: TaskId,
    pub owner: OwnerId,
    pub source: Source,
    pub chat: ChatRef,
    pub status: MessageRef,
    pub cancel: CancellationToken,
    pub registry: Arc<TaskRegistry>,
    pub config: Arc<EngineConfig>,
    pub caps: Capabilities,
    pub events_tx: mpsc::Sender<TaskEvent>,
}

struct Delivered {
    name: String,
    summary: RelaySummary,
}

impl Pipeline {
    /// Directory that holds every artifact of this task.
    pub(crate) fn task_dir(work_dir: &Path, owner: OwnerId, id: TaskId) -> PathBuf {
        work_dir.join(owner.to_string()).join(id.to_string())
    }

    /// Runs the task and always finishes it: artifacts deleted, terminal
    /// status emitted, registry entry removed, event sent.
    pub(crate) async fn execute(self) {
        let task_dir = Self::task_dir(&self.config.work_dir, self.owner, self.id);
        let reporter = ProgressReporter::new(
            ReportContext {
                task: self.id,
                owner: self.owner,
                message: self.status,
                notifier: Arc::clone(&self.caps.notifier),
                mirror: self.caps.mirror.clone(),
            },
            self.config.progress_interval,
        );

        // A panicking capability must not skip cleanup and deregistration.
        let result = AssertUnwindSafe(self.run_stages(&task_dir, &reporter))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(&*payload))));

        let (outcome, text) = match result {
            Ok(delivered) => {
                info!(
                    task = %self.id,
                    parts = delivered.summary.parts_sent,
                    bytes = delivered.summary.bytes_sent,
                    "task completed"
                );
                let text = format!(
                    "Completed: {}\n{} part(s), {}",
                    delivered.name,
                    delivered.summary.parts_sent,
                    human_bytes(delivered.summary.bytes_sent)
                );
                (Outcome::Completed(delivered.summary), text)
            }
            Err(e) if e.is_cancelled() => {
                info!(task = %self.id, "task cancelled");
                (Outcome::Cancelled, format!("Cancelled task {}", self.id.short()))
            }
            Err(e) => {
                error!(task = %self.id, error = %e, "task failed");
                let text = format!("Failed task {}: {e}", self.id.short());
                (Outcome::Failed(e.to_string()), text)
            }
        };

        self.cleanup(&task_dir).await;
        let state = outcome.state();
        self.registry.advance(self.id, state);
        if AssertUnwindSafe(reporter.finish(state, text))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(task = %self.id, "terminal notification panicked");
        }
        self.registry.remove(self.id);

        let event = TaskEvent::Finished {
            id: self.id,
            owner: self.owner,
            outcome,
        };
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(task = %self.id, "event channel full, dropping terminal event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(task = %self.id, "no event listener");
            }
        }
    }

    async fn run_stages(
        &self,
        task_dir: &Path,
        reporter: &ProgressReporter,
    ) -> Result<Delivered, PipelineError> {
        self.check_cancelled()?;

        // 1. Fetch
        self.registry.advance(self.id, TaskState::Fetching);
        let fetched = fetch(
            self.caps.resolver.as_ref(),
            &self.source,
            task_dir,
            self.config.read_buffer_size,
            &self.cancel,
            reporter,
        )
        .await?;

        self.check_cancelled()?;

        // 2. Split, only when the file exceeds the part limit
        let parts = if fetched.bytes > self.config.max_part_size {
            self.registry.advance(self.id, TaskState::Splitting);
            reporter.update(Progress {
                stage: Stage::Splitting,
                name: fetched.name.clone(),
                current: 0,
                total: fetched.bytes,
            });

            let path = fetched.path.clone();
            let max = self.config.max_part_size;
            tokio::task::spawn_blocking(move || split_file(&path, max))
                .await
                .map_err(|e| PipelineError::Join(e.to_string()))??
        } else {
            vec![fetched.path.clone()]
        };

        self.check_cancelled()?;

        // 3. Relay
        self.registry.advance(self.id, TaskState::Relaying);
        let summary = relay(
            self.caps.sink.as_ref(),
            self.chat,
            &parts,
            &self.config.relay,
            &self.cancel,
            reporter,
        )
        .await?;

        Ok(Delivered {
            name: fetched.name,
            summary,
        })
    }

    /// Deletes the task directory and, when it became empty, the owner's.
    async fn cleanup(&self, task_dir: &Path) {
        match tokio::fs::remove_dir_all(task_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(task = %self.id, dir = %task_dir.display(), error = %e, "failed to remove task directory");
            }
        }
        if let Some(owner_dir) = task_dir.parent() {
            // Fails while other tasks of the owner still have files.
            let _ = tokio::fs::remove_dir(owner_dir).await;
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
