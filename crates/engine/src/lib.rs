//! Transfer task engine.
//!
//! This crate implements the **task lifecycle** for fetching a remote
//! resource and relaying it to a chat destination. It has no transport
//! dependencies of its own: the front-end provides [`Resolver`], [`Sink`]
//! and [`Notifier`] implementations that bridge to the real network.
//!
//! # Pipeline
//!
//! 1. **Register**: the task enters the [`TaskRegistry`] as `Pending`
//! 2. **Fetch**: stream the resource into the task's private directory
//! 3. **Split**: cut files above the part limit into numbered parts
//! 4. **Relay**: send parts in order with bounded retry
//! 5. **Finish**: delete artifacts, emit the terminal status, deregister
//!
//! Cancellation is cooperative: [`TaskRegistry::request_cancel`] flips a
//! flag that every stage checks at fixed points.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod ports;
pub mod registry;
pub mod relay;
pub mod reporter;
pub mod sweep;
pub mod types;

mod pipeline;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenience.
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{EVENT_CAPACITY, Engine};
pub use error::{FetchError, PipelineError, RegistryError, RelayError};
pub use ports::{MemoryMirror, Notifier, Resolver, Sink, TaskMirror};
pub use registry::TaskRegistry;
pub use reporter::{ProgressReporter, ReportContext};
pub use sweep::sweep_orphans;
pub use types::{
    Attachment, FetchOutput, MirrorRecord, Outcome, RelaySummary, Resolved, TaskEvent,
};
