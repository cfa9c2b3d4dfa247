pub mod notify;
pub mod payment;
pub mod repository;
pub mod sync;

use uuid::Uuid;

/// Workspace-wide error taxonomy. Validation, not-found and authorization
/// failures fail fast; conflicts carry enough context for the caller to
/// offer alternatives; payment failures are classified retryable or
/// terminal so the retry policy can tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("stale version on booking {0}")]
    StaleVersion(Uuid),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("payment gateway failure: {message} (retryable: {retryable})")]
    Payment { message: String, retryable: bool },

    #[error("compensation failed, manual reconciliation required: {0}")]
    Compensation(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the retry policy may transparently re-attempt the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Payment { retryable: true, .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
