//! Error types for the clients module.

use shipwright_ops::OpsError;
use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by the remote collaborators and settings loading.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Missing configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{service} API error {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not readable as text: {0}")]
    Unreadable(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ClientError {
    /// Worth another attempt: network failures, 5xx and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<ClientError> for OpsError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(path) => OpsError::NotFound(path),
            ClientError::Unreadable(path) => OpsError::Unreadable(path),
            other => OpsError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let api = |status| ClientError::Api { service: "GitHub", status, body: String::new() };
        assert!(api(503).is_transient());
        assert!(api(429).is_transient());
        assert!(!api(401).is_transient());
        assert!(ClientError::Network("reset".into()).is_transient());
    }

    #[test]
    fn test_ops_mapping() {
        let not_found: OpsError = ClientError::NotFound("a.py".into()).into();
        assert!(matches!(not_found, OpsError::NotFound(p) if p == "a.py"));
        let binary: OpsError = ClientError::Unreadable("logo.png".into()).into();
        assert!(matches!(binary, OpsError::Unreadable(p) if p == "logo.png"));
        let other: OpsError = ClientError::Network("down".into()).into();
        assert!(matches!(other, OpsError::Transport(_)));
    }
}
