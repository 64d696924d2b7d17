//! Typed failures surfaced by the sync engine

use thiserror::Error;

use crate::models::HistoryCursor;

/// Every failure the engine can hand back to a caller
///
/// Cloneable so a single chunk-level failure can be delivered to each job
/// of a batch chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Credential rejected or expired; never retried by the engine
    #[error("authorization rejected: {0}")]
    Authorization(String),

    /// Quota or rate limit hit; the caller may retry with backoff
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// History cursor is older than the server's retention window
    #[error("history cursor {start} is no longer retained, full resync required")]
    StaleCursor { start: HistoryCursor },

    /// Push topic missing, malformed, or not writable by the service
    #[error("invalid watch topic: {0}")]
    InvalidTopic(String),

    /// A batch sub-request received no individual response
    #[error("no response for batch item {0}")]
    NoResponse(String),

    /// Network-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other non-success HTTP status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// A history cursor could not be read as an unsigned integer
    #[error("invalid history cursor: {0:?}")]
    InvalidCursor(String),

    /// The operation was cancelled at a page or chunk boundary
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the caller may reasonably retry the failed unit of work
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Transport(_) | Self::NoResponse(_)
        )
    }

    /// Whether a full resync is required
    pub fn is_stale_cursor(&self) -> bool {
        matches!(self, Self::StaleCursor { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Result alias used throughout the engine
pub type SyncResult<T> = Result<T, SyncError>;
