//! Throttled progress reporting.
//!
//! Stages call [`ProgressReporter::update`] as often as they like. A single
//! emitter task per reporter turns the latest sample into a notification,
//! at most once per interval. The terminal status goes through
//! [`ProgressReporter::finish`], which bypasses the throttle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leech_protocol::{MessageRef, NotifyError, OwnerId, Progress, Stage, TaskId, TaskState};
use leech_transfer::{SpeedCalculator, render_progress};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::ports::{Notifier, TaskMirror};
use crate::types::MirrorRecord;

/// How many times the terminal emission is tried when rate limited.
const TERMINAL_ATTEMPTS: u32 = 3;

/// Where a task's notifications go.
#[derive(Clone)]
pub struct ReportContext {
    pub task: TaskId,
    pub owner: OwnerId,
    pub message: MessageRef,
    pub notifier: Arc<dyn Notifier>,
    pub mirror: Option<Arc<dyn TaskMirror>>,
}

impl ReportContext {
    async fn mirror(&self, state: TaskState, text: &str) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let record = MirrorRecord {
            task_id: self.task,
            owner: self.owner,
            state,
            last_progress_text: Some(text.to_string()),
            updated_at: Utc::now(),
        };
        if let Err(e) = mirror.record(record).await {
            warn!(task = %self.task, error = %e, "failed to mirror task state");
        }
    }

    async fn emit_progress(&self, text: &str) {
        match self.notifier.emit(self.message, text.to_string()).await {
            Ok(()) => {}
            Err(NotifyError::NotModified) => {
                trace!(task = %self.task, "progress text unchanged");
            }
            Err(e) => {
                warn!(task = %self.task, error = %e, "progress notification failed");
            }
        }
    }

    async fn emit_terminal(&self, text: &str) {
        for attempt in 1..=TERMINAL_ATTEMPTS {
            match self.notifier.emit(self.message, text.to_string()).await {
                Ok(()) | Err(NotifyError::NotModified) => return,
                Err(NotifyError::RateLimited { retry_after }) if attempt < TERMINAL_ATTEMPTS => {
                    warn!(
                        task = %self.task,
                        attempt,
                        retry_after_secs = retry_after.as_secs(),
                        "terminal notification rate limited, waiting"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => {
                    warn!(task = %self.task, error = %e, "terminal notification failed");
                    return;
                }
            }
        }
    }
}

/// Coalesces progress samples of one task into rate-limited notifications.
pub struct ProgressReporter {
    updates: watch::Sender<Option<Progress>>,
    speed: Arc<SpeedCalculator>,
    emitter: JoinHandle<()>,
    ctx: Arc<ReportContext>,
}

impl ProgressReporter {
    /// Starts the emitter task. Must be called inside a tokio runtime.
    pub fn new(ctx: ReportContext, interval: Duration) -> Self {
        let (updates, rx) = watch::channel(None);
        let speed = Arc::new(SpeedCalculator::default());
        let ctx = Arc::new(ctx);

        let emitter = tokio::spawn(run_emitter(
            Arc::clone(&ctx),
            Arc::clone(&speed),
            rx,
            interval,
        ));

        Self {
            updates,
            speed,
            emitter,
            ctx,
        }
    }

    /// Records a sample. Never blocks; samples arriving faster than the
    /// emitter consumes them replace each other.
    pub fn update(&self, progress: Progress) {
        self.speed.add_sample(progress.current);
        self.updates.send_replace(Some(progress));
    }

    /// Stops periodic reporting and emits `text` unconditionally.
    pub async fn finish(self, state: TaskState, text: String) {
        let ProgressReporter {
            updates,
            emitter,
            ctx,
            ..
        } = self;

        // Closing the channel lets the emitter drain and exit, so the
        // terminal text is always the last one shown.
        drop(updates);
        if let Err(e) = emitter.await {
            warn!(task = %ctx.task, error = %e, "progress emitter failed");
        }

        debug!(task = %ctx.task, %state, "emitting terminal status");
        ctx.mirror(state, &text).await;
        ctx.emit_terminal(&text).await;
    }
}

async fn run_emitter(
    ctx: Arc<ReportContext>,
    speed: Arc<SpeedCalculator>,
    mut rx: watch::Receiver<Option<Progress>>,
    interval: Duration,
) {
    let mut last_emit: Option<Instant> = None;

    while rx.changed().await.is_ok() {
        let latest = rx.borrow_and_update().clone();
        let Some(progress) = latest else {
            continue;
        };

        let now = Instant::now();
        if last_emit.is_some_and(|at| now.duration_since(at) < interval) {
            continue;
        }
        last_emit = Some(now);

        let remaining = progress.total.saturating_sub(progress.current);
        let eta = if progress.total > 0 {
            speed.eta(remaining)
        } else {
            None
        };
        let text = render_progress(&progress, speed.bytes_per_second(), eta);

        ctx.emit_progress(&text).await;
        ctx.mirror(state_of(progress.stage), &text).await;
    }
}

fn state_of(stage: Stage) -> TaskState {
    match stage {
        Stage::Downloading => TaskState::Fetching,
        Stage::Splitting => TaskState::Splitting,
        Stage::Uploading { .. } => TaskState::Relaying,
    }
}
