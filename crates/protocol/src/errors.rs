//! Errors returned by the external capabilities.

use std::time::Duration;

/// Failure reported by a destination sink while sending one file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Flood control: the destination asks us to wait before trying again.
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The destination refused the file; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transient failure (connection reset, RPC error, timeout).
    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// Failure reported by a notifier while editing the status message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// The new text is identical to what is already displayed.
    #[error("message not modified")]
    NotModified,

    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("notify failed: {0}")]
    Transport(String),
}

/// A task identifier could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task id: {0:?}")]
pub struct ParseIdError(pub String);
