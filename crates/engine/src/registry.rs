//! Task registry: the single owner of shared task state.
//!
//! Every other component sees tasks only as [`Task`] snapshots. The cancel
//! flag of each task is a [`CancellationToken`], so setting it is atomic,
//! happens at most once and is never reset.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use leech_protocol::{OwnerId, Source, Task, TaskId, TaskState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::RegistryError;

struct Entry {
    task: Task,
    cancel: CancellationToken,
}

impl Entry {
    fn snapshot(&self) -> Task {
        let mut task = self.task.clone();
        task.cancel_requested = self.cancel.is_cancelled();
        task
    }

    fn is_live(&self) -> bool {
        !self.task.state.is_terminal()
    }
}

/// Map from task id to task state.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Entry>>,
    max_per_owner: Option<usize>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TaskRegistry {
    /// Creates an empty registry. `max_per_owner` caps concurrent tasks
    /// per owner; `None` means unlimited.
    pub fn new(max_per_owner: Option<usize>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_per_owner,
        }
    }

    /// Inserts a new `Pending` task and returns its id.
    pub fn register(&self, owner: OwnerId, source: Source) -> Result<TaskId, RegistryError> {
        let mut tasks = self.write();

        if let Some(limit) = self.max_per_owner {
            let active = tasks
                .values()
                .filter(|e| e.task.owner == owner && e.is_live())
                .count();
            if active >= limit {
                return Err(RegistryError::OwnerLimit { owner, limit });
            }
        }

        let id = TaskId::new();
        tasks.insert(
            id,
            Entry {
                task: Task {
                    id,
                    owner,
                    source,
                    state: TaskState::Pending,
                    cancel_requested: false,
                    created_at: Utc::now(),
                },
                cancel: CancellationToken::new(),
            },
        );

        info!(task = %id, %owner, "task registered");
        Ok(id)
    }

    /// Requests cancellation of a live task.
    ///
    /// Returns `true` if a non-terminal task with this id exists. Calling it
    /// again is harmless and returns the same answer.
    pub fn request_cancel(&self, id: TaskId) -> bool {
        let tasks = self.read();
        match tasks.get(&id) {
            Some(entry) if entry.is_live() => {
                if !entry.cancel.is_cancelled() {
                    entry.cancel.cancel();
                    info!(task = %id, "cancel requested");
                }
                true
            }
            _ => false,
        }
    }

    /// Like [`request_cancel`](Self::request_cancel), but only for the
    /// task's own owner.
    pub fn request_cancel_by(&self, id: TaskId, owner: OwnerId) -> Result<(), RegistryError> {
        let tasks = self.read();
        let entry = tasks
            .get(&id)
            .filter(|e| e.is_live())
            .ok_or(RegistryError::NotFound(id))?;

        if entry.task.owner != owner {
            return Err(RegistryError::NotOwner { id, owner });
        }

        if !entry.cancel.is_cancelled() {
            entry.cancel.cancel();
            info!(task = %id, %owner, "cancel requested");
        }
        Ok(())
    }

    /// Requests cancellation of every live task of `owner`.
    ///
    /// Returns how many flags were flipped by this call.
    pub fn cancel_all_for_owner(&self, owner: OwnerId) -> usize {
        let tasks = self.read();
        let mut flipped = 0;
        for entry in tasks.values() {
            if entry.task.owner == owner && entry.is_live() && !entry.cancel.is_cancelled() {
                entry.cancel.cancel();
                flipped += 1;
            }
        }
        if flipped > 0 {
            info!(%owner, count = flipped, "cancel requested for all tasks");
        }
        flipped
    }

    /// Returns a snapshot of the task.
    pub fn get(&self, id: TaskId) -> Result<Task, RegistryError> {
        self.read()
            .get(&id)
            .map(Entry::snapshot)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Snapshots of all tasks of `owner`, oldest first.
    pub fn tasks_for_owner(&self, owner: OwnerId) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .read()
            .values()
            .filter(|e| e.task.owner == owner)
            .map(Entry::snapshot)
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Snapshots of every registered task, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read().values().map(Entry::snapshot).collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cancel token of a task, for the pipeline that runs it.
    pub(crate) fn cancel_token(&self, id: TaskId) -> Option<CancellationToken> {
        self.read().get(&id).map(|e| e.cancel.clone())
    }

    /// Moves a task forward to `next`.
    ///
    /// Backward or repeated transitions are ignored; returns whether the
    /// state changed.
    pub(crate) fn advance(&self, id: TaskId, next: TaskState) -> bool {
        let mut tasks = self.write();
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        if !entry.task.state.can_advance_to(next) {
            debug!(task = %id, from = %entry.task.state, to = %next, "ignored state transition");
            return false;
        }
        debug!(task = %id, from = %entry.task.state, to = %next, "task state changed");
        entry.task.state = next;
        true
    }

    /// Deletes the entry. Called once by the owning pipeline.
    pub(crate) fn remove(&self, id: TaskId) -> Option<Task> {
        self.write().remove(&id).map(|e| e.snapshot())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Entry>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Entry>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
