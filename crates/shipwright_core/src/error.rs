//! Error types for the core module.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while driving a run.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Generation request failed: {0}")]
    Generation(String),

    #[error("Deployment platform error: {0}")]
    Deployment(String),

    #[error("Deployment timed out after {0} seconds")]
    DeploymentTimeout(u64),

    #[error("Deployment failed with status {0}")]
    DeploymentFailure(String),

    #[error("Retry budget of {0} exhausted")]
    RetryBudgetExhausted(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
