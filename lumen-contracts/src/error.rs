use thiserror::Error;

/// Failure taxonomy shared by every backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("backend operation timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether repeating the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::Timeout => true,
            BackendError::Http { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::BackendError;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Timeout.is_transient());
        assert!(
            BackendError::Http {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Http {
                status: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!BackendError::Unauthenticated.is_transient());
    }
}
