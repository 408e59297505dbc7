//! Engine facade: registers tasks and runs one pipeline per task.

use std::sync::Arc;

use leech_protocol::{ChatRef, MessageRef, OwnerId, Source, TaskId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::RegistryError;
use crate::pipeline::{Capabilities, Pipeline};
use crate::ports::{Notifier, Resolver, Sink, TaskMirror};
use crate::registry::TaskRegistry;
use crate::sweep::sweep_orphans;
use crate::types::TaskEvent;

/// Terminal events buffered for the listener. Further events are dropped
/// while the buffer is full.
pub const EVENT_CAPACITY: usize = 256;

/// Runs transfer tasks concurrently.
pub struct Engine {
    registry: Arc<TaskRegistry>,
    config: Arc<EngineConfig>,
    caps: Capabilities,
    events_tx: mpsc::Sender<TaskEvent>,
    events_rx: Option<mpsc::Receiver<TaskEvent>>,
}

impl Engine {
    /// Creates an engine over the given capabilities.
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn Resolver>,
        sink: Arc<dyn Sink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            registry: Arc::new(TaskRegistry::new(config.max_tasks_per_owner)),
            config: Arc::new(config),
            caps: Capabilities {
                resolver,
                sink,
                notifier,
                mirror: None,
            },
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Mirrors every progress and terminal emission to `mirror`.
    pub fn with_mirror(mut self, mirror: Arc<dyn TaskMirror>) -> Self {
        self.caps.mirror = Some(mirror);
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TaskEvent>> {
        self.events_rx.take()
    }

    /// Registers a task and starts its pipeline without waiting for it.
    ///
    /// Parts go to `chat`; progress edits `status`. Must be called inside a
    /// tokio runtime.
    pub fn submit(
        &self,
        owner: OwnerId,
        source: Source,
        chat: ChatRef,
        status: MessageRef,
    ) -> Result<TaskId, RegistryError> {
        let id = self.registry.register(owner, source.clone())?;
        let cancel = self
            .registry
            .cancel_token(id)
            .ok_or(RegistryError::NotFound(id))?;

        let pipeline = Pipeline {
            id,
            owner,
            source,
            chat,
            status,
            cancel,
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            caps: self.caps.clone(),
            events_tx: self.events_tx.clone(),
        };

        debug!(task = %id, %owner, "spawning pipeline");
        tokio::spawn(pipeline.execute());
        Ok(id)
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Removes task directories no live task owns. Returns how many.
    pub async fn sweep_orphans(&self) -> std::io::Result<usize> {
        sweep_orphans(&self.config.work_dir, &self.registry).await
    }
}
