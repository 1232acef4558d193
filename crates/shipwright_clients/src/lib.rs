//! # shipwright_clients
//!
//! Remote collaborators for the shipwright loop:
//!
//! - [`DeepSeekClient`]: chat-completions generator with conversation memory
//! - [`GitHubTree`]: a repository branch as a target tree
//! - [`RailwayDeployer`]: deployment trigger and status over GraphQL
//! - [`Settings`]: `shipwright.toml` plus environment secrets

pub mod deepseek;
pub mod error;
pub mod github;
pub mod railway;
pub mod settings;

pub use deepseek::{ChatMessage, DeepSeekClient};
pub use error::{ClientError, ClientResult};
pub use github::{GitHubTree, RemoteFile};
pub use railway::{map_status, RailwayDeployer, RailwayDeployment};
pub use settings::{GitHubSettings, LlmSettings, RailwaySettings, Secret, Settings};
