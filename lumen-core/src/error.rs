use lumen_contracts::BackendError;
use thiserror::Error;

/// Errors surfaced by the cache, scheduler and snapshot paths.
///
/// `Clone` because one resolution result fans out to every waiter sharing the
/// in-flight future.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("URL resolution failed: {0}")]
    Resolution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Materialization failed: {0}")]
    Materialize(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthenticated => CacheError::Unauthenticated,
            BackendError::NotFound(path) => CacheError::NotFound(path),
            BackendError::Http { status, message } => {
                CacheError::Resolution(format!("HTTP {status}: {message}"))
            }
            BackendError::Transport(msg) => CacheError::Resolution(msg),
            BackendError::Decode(msg) => CacheError::Materialize(msg),
            BackendError::Storage(msg) => CacheError::Io(msg),
            BackendError::Timeout => CacheError::Timeout,
            BackendError::Other(msg) => CacheError::Internal(msg),
        }
    }
}

impl CacheError {
    /// Map a failure from the URL signing call. An undecodable sign response
    /// is a resolution failure, not a materialization one.
    pub fn from_resolver(err: BackendError) -> Self {
        match err {
            BackendError::Decode(msg) => {
                CacheError::Resolution(format!("malformed sign response: {msg}"))
            }
            other => CacheError::from(other),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Snapshot(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
