//! Application orchestrator: wires the engine to the console.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use leech_engine::{Engine, Outcome, TaskEvent};
use leech_http::HttpResolver;
use leech_protocol::{ChatRef, MessageRef, OwnerId, Source, Task, TaskId};
use leech_transfer::{human_bytes, join_parts};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::commands::{Command, HELP};
use crate::config::Config;
use crate::mirror::JsonlMirror;
use crate::notifier::ConsoleNotifier;
use crate::sink::DirectorySink;

/// How long `quit` waits for cancelled tasks to clean up.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Runs leechd until `quit`, end of input, or Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Engine --
    let engine_config = config.to_engine_config();
    let resolver = Arc::new(HttpResolver::new().context("failed to build HTTP client")?);
    let sink = Arc::new(DirectorySink::new(
        &config.outbox_dir,
        engine_config.max_part_size,
    ));
    let notifier = Arc::new(ConsoleNotifier::new());
    let mut engine = Engine::new(engine_config, resolver, sink, notifier.clone());
    if let Some(path) = config.mirror_path() {
        tracing::info!(path = %path.display(), "mirroring task state");
        engine = engine.with_mirror(Arc::new(JsonlMirror::new(path)));
    }
    let mut events = engine
        .take_events()
        .context("engine event receiver already taken")?;

    match engine.sweep_orphans().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "cleaned up leftovers of a previous run"),
        Err(e) => tracing::warn!(error = %e, "orphan sweep failed"),
    }

    let board = Arc::new(StatusBoard::new(notifier));
    let console = Console::new(engine, &config, Arc::clone(&board));

    // -- Event listener --
    let events_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", board.finish(&event));
        }
    });

    tracing::info!("leechd ready");
    println!("{HELP}");

    // -- Main loop: read commands until shutdown --
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut drain = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => cancel.cancel(),
                    Ok(Some(cmd)) => println!("{}", console.execute(cmd).await),
                    Ok(None) => {}
                    Err(e) => println!("{e:#}"),
                },
                Ok(None) => {
                    tracing::info!("input closed, waiting for running tasks");
                    drain = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read input");
                    break;
                }
            },
        }
    }

    // -- Graceful shutdown --
    if drain {
        tokio::select! {
            _ = console.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, cancelling running tasks");
                console.stop().await;
            }
        }
    } else {
        console.stop().await;
    }

    // Pipelines that outlived the shutdown timeout still hold event senders.
    drop(console);
    if tokio::time::timeout(Duration::from_secs(1), events_task)
        .await
        .is_err()
    {
        tracing::warn!("event listener still busy at exit");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status messages
// ---------------------------------------------------------------------------

/// Tracks which status message belongs to which task.
struct StatusBoard {
    notifier: Arc<ConsoleNotifier>,
    messages: Mutex<HashMap<TaskId, MessageRef>>,
}

impl StatusBoard {
    fn new(notifier: Arc<ConsoleNotifier>) -> Self {
        Self {
            notifier,
            messages: Mutex::new(HashMap::new()),
        }
    }

    fn track(&self, id: TaskId, message: MessageRef) {
        self.lock().insert(id, message);
    }

    fn release(&self, id: TaskId) {
        if let Some(message) = self.lock().remove(&id) {
            self.notifier.forget(message);
        }
    }

    /// Releases the task's status message and describes the outcome.
    fn finish(&self, event: &TaskEvent) -> String {
        let TaskEvent::Finished { id, outcome, .. } = event;
        self.release(*id);
        describe_outcome(*id, outcome)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, MessageRef>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Executes parsed commands on behalf of the configured owner.
struct Console {
    engine: Engine,
    owner: OwnerId,
    chat: ChatRef,
    next_message: AtomicI64,
    board: Arc<StatusBoard>,
}

impl Console {
    fn new(engine: Engine, config: &Config, board: Arc<StatusBoard>) -> Self {
        Self {
            engine,
            owner: OwnerId(config.owner),
            chat: ChatRef(config.chat),
            next_message: AtomicI64::new(1),
            board,
        }
    }

    /// Runs one command and returns what to print.
    async fn execute(&self, cmd: Command) -> String {
        match cmd {
            Command::Leech { url, format } => self.leech(url, format),
            Command::Cancel(Some(id)) => match self.engine.registry().request_cancel_by(id, self.owner) {
                Ok(()) => format!("Cancellation requested for task {}", id.short()),
                Err(e) => e.to_string(),
            },
            Command::Cancel(None) => match self.engine.registry().cancel_all_for_owner(self.owner) {
                0 => "No running tasks".to_string(),
                n => format!("Cancelling {n} task(s)"),
            },
            Command::Status(Some(id)) => match self.engine.registry().get(id) {
                Ok(task) => describe_task(&task),
                Err(e) => e.to_string(),
            },
            Command::Status(None) => {
                let tasks = self.engine.registry().tasks_for_owner(self.owner);
                if tasks.is_empty() {
                    return "No running tasks".to_string();
                }
                tasks.iter().map(describe_task).collect::<Vec<_>>().join("\n")
            }
            Command::Cleanup => match self.engine.sweep_orphans().await {
                Ok(n) => format!("Removed {n} orphaned task director(ies)"),
                Err(e) => format!("Cleanup failed: {e}"),
            },
            Command::Join { out, parts } => join(out, parts).await,
            Command::Help => HELP.to_string(),
            Command::Quit => "Bye".to_string(),
        }
    }

    fn leech(&self, url: String, format: Option<String>) -> String {
        let mut source = Source::new(url);
        if let Some(format) = format {
            source = source.with_format(format);
        }
        let message = MessageRef {
            chat: self.chat,
            message_id: self.next_message.fetch_add(1, Ordering::Relaxed),
        };

        match self.engine.submit(self.owner, source, self.chat, message) {
            Ok(id) => {
                self.board.track(id, message);
                // The task may already be gone if it failed immediately.
                if !self.engine.registry().contains(id) {
                    self.board.release(id);
                }
                format!("Task {id} started")
            }
            Err(e) => e.to_string(),
        }
    }

    /// Requests cancellation of every task and waits for them to finish.
    async fn stop(&self) {
        let tasks = self.engine.registry().tasks();
        for task in &tasks {
            self.engine.registry().request_cancel(task.id);
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "cancelling running tasks");
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.engine.registry().len(),
                "tasks did not stop in time"
            );
        }
    }

    async fn wait_idle(&self) {
        while !self.engine.registry().is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

async fn join(out: PathBuf, parts: Vec<PathBuf>) -> String {
    let target = out.clone();
    match tokio::task::spawn_blocking(move || join_parts(&parts, &target)).await {
        Ok(Ok(bytes)) => format!("Wrote {} to {}", human_bytes(bytes), out.display()),
        Ok(Err(e)) => format!("Join failed: {e}"),
        Err(e) => format!("Join failed: {e}"),
    }
}

fn describe_task(task: &Task) -> String {
    let cancelling = if task.cancel_requested {
        " (cancelling)"
    } else {
        ""
    };
    format!(
        "{}  {:<10} {}{}  since {}",
        task.id.short(),
        task.state.to_string(),
        task.source.url,
        cancelling,
        task.created_at.format("%H:%M:%S")
    )
}

fn describe_outcome(id: TaskId, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Completed(summary) => format!(
            "Task {} completed: {} part(s), {}",
            id.short(),
            summary.parts_sent,
            human_bytes(summary.bytes_sent)
        ),
        Outcome::Cancelled => format!("Task {} cancelled", id.short()),
        Outcome::Failed(cause) => format!("Task {} failed: {cause}", id.short()),
    }
}
