//! Shared types for the leech transfer engine.
//!
//! Everything that crosses a crate boundary lives here: task identifiers,
//! the task snapshot handed out by the registry, progress samples, and the
//! error types returned by the external capabilities (destination sink and
//! progress notifier).

pub mod errors;
pub mod ids;
pub mod types;

pub use errors::{NotifyError, ParseIdError, TransportError};
pub use ids::{ChatRef, MessageRef, OwnerId, TaskId};
pub use types::{MediaKind, Progress, Source, Stage, Task, TaskState};
