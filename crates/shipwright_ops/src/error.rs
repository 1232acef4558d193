//! Error types for the operations module.

use thiserror::Error;

/// Result type alias for operation handling.
pub type OpsResult<T> = Result<T, OpsError>;

/// Errors that can occur while applying operations to a tree.
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File is not readable as text: {0}")]
    Unreadable(String),

    #[error("Nesting depth {depth} exceeds the limit of {limit}")]
    RecursionLimitExceeded { limit: usize, depth: usize },

    #[error("Not a file mutation: {0}")]
    NotALeaf(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpsError {
    /// Whether this error aborts the current pass.
    ///
    /// `AlreadyExists`, `NotFound` and `Unreadable` are per-operation
    /// failures that are recorded and skipped; everything else means the
    /// tree itself can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyExists(_) | Self::NotFound(_) | Self::Unreadable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_failures_are_not_fatal() {
        assert!(!OpsError::AlreadyExists("a.py".into()).is_fatal());
        assert!(!OpsError::NotFound("a.py".into()).is_fatal());
        assert!(!OpsError::Unreadable("logo.png".into()).is_fatal());
        assert!(OpsError::Transport("connection reset".into()).is_fatal());
        assert!(OpsError::RecursionLimitExceeded { limit: 10, depth: 11 }.is_fatal());
    }
}
