//! # shipwright_core
//!
//! The verification/retry loop: generate changes, apply them, review,
//! deploy, monitor, review the deployment and retry with fixes until the
//! model confirms success or the retry budget runs out.
//!
//! The outside world is reached through two collaborator traits,
//! [`Generator`] and [`Deployer`], plus the tree-access capability from
//! `shipwright_ops`.

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod prompts;
pub mod state;

pub use cancel::CancellationFlag;
pub use collaborators::{
    Deployer, DeploymentHandle, DeploymentReport, DeploymentState, DeploymentStatus, Generator,
    VerificationSubject,
};
pub use config::{OrchestratorConfig, MAX_DURATION};
pub use error::{CoreError, CoreResult};
pub use locks::TargetLocks;
pub use orchestrator::Orchestrator;
pub use state::{FailureReason, Phase, RunOutcome, RunRecord, Transition};
