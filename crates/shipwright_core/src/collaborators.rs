//! Capabilities the orchestrator consumes from the outside world.
//!
//! The generation collaborator produces free-form text that is always run
//! through the parser and validator; the deployment collaborator triggers
//! and observes deployments of the target tree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// What a verification request is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationSubject {
    /// Review the (already mutated) tree before deploying.
    Tree { context: String },
    /// Review a finished deployment from its logs.
    Deployment(DeploymentReport),
}

/// Language-model collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Ask for changes that fulfil `prompt` given the current tree.
    async fn generate(&self, prompt: &str, tree_context: &str) -> CoreResult<String>;

    /// Ask whether the tree or deployment is correct.
    async fn verify(&self, subject: &VerificationSubject) -> CoreResult<String>;
}

/// Reference to a triggered deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHandle {
    /// Platform deployment id; `None` when the platform deploys on its own
    /// and the latest deployment should be observed instead.
    pub id: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl DeploymentHandle {
    pub fn tracked(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            triggered_at: Utc::now(),
        }
    }

    pub fn untracked() -> Self {
        Self {
            id: None,
            triggered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Success,
    Failure,
}

/// One observation of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub state: DeploymentState,
    /// Status string as reported by the platform, e.g. `CRASHED`
    pub platform_status: String,
    pub deployment_id: Option<String>,
    /// Log lines; only expected once the state is terminal
    pub logs: Vec<String>,
}

impl DeploymentStatus {
    pub fn pending(platform_status: impl Into<String>) -> Self {
        Self {
            state: DeploymentState::Pending,
            platform_status: platform_status.into(),
            deployment_id: None,
            logs: Vec::new(),
        }
    }

    pub fn finished(state: DeploymentState, platform_status: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            state,
            platform_status: platform_status.into(),
            deployment_id: None,
            logs,
        }
    }

    pub fn with_deployment_id(mut self, id: impl Into<String>) -> Self {
        self.deployment_id = Some(id.into());
        self
    }
}

/// Terminal outcome of a deployment, as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub succeeded: bool,
    pub status: String,
    pub deployment_id: Option<String>,
    pub logs: Vec<String>,
}

impl DeploymentReport {
    pub fn from_status(status: &DeploymentStatus) -> Self {
        Self {
            succeeded: status.state == DeploymentState::Success,
            status: status.platform_status.clone(),
            deployment_id: status.deployment_id.clone(),
            logs: status.logs.clone(),
        }
    }

    pub fn timed_out(deployment_id: Option<String>, timeout_secs: u64) -> Self {
        Self {
            succeeded: false,
            status: "TIMEOUT".to_string(),
            deployment_id,
            logs: vec![format!("Deployment timed out after {} seconds", timeout_secs)],
        }
    }
}

/// Deployment platform collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Start a deployment of the current tree.
    async fn trigger(&self) -> CoreResult<DeploymentHandle>;

    /// Observe the deployment referenced by `handle`.
    async fn poll_status(&self, handle: &DeploymentHandle) -> CoreResult<DeploymentStatus>;
}
