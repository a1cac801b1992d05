use thiserror::Error;

/// Uniform failure taxonomy shared by every source adapter, the pool, and
/// the scheduler.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    NetworkTransient(String),

    #[error("remote rejected request: HTTP {status}")]
    RemoteRejected { status: u16, body_snippet: String },

    #[error("remote overloaded: HTTP {status}")]
    RemoteOverload { status: u16 },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalBug(String),
}

impl IngestError {
    /// Whether the scheduler should re-queue the task that produced this
    /// error rather than surface it as terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::NetworkTransient(_) | IngestError::RemoteOverload { .. }
        )
    }

    /// Whether this error should ever reach the UI / progress stream.
    /// Cancellation is deliberately silent.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, IngestError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
