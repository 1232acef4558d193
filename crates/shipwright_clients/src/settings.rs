//! Process settings: `shipwright.toml` overlaid by environment variables.
//!
//! Secrets are only ever read from the environment and are never
//! serialized back out.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shipwright_core::OrchestratorConfig;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Default settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "shipwright.toml";

pub const DEEPSEEK_API_KEY: &str = "DEEPSEEK_API_KEY";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const RAILWAY_API_KEY: &str = "RAILWAY_API_KEY";

const REPO_PLACEHOLDER: &str = "username/repository-name";
const PROJECT_PLACEHOLDER: &str = "your-railway-project-id";

/// A secret value that never shows up in debug output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Option<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(value))
        }
    }

    pub fn expose(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Secret(***)"),
            None => f.write_str("Secret(unset)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    /// Repository as `owner/repo`
    pub repo: String,
    pub branch: String,
    pub api_url: String,
    #[serde(skip)]
    pub token: Secret,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            repo: String::new(),
            branch: "main".to_string(),
            api_url: "https://api.github.com".to_string(),
            token: Secret::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RailwaySettings {
    pub project_id: String,
    pub api_url: String,
    #[serde(skip)]
    pub api_key: Secret,
}

impl Default for RailwaySettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            api_url: "https://backboard.railway.app/graphql".to_string(),
            api_key: Secret::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub api_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Secret,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "deepseek-coder".to_string(),
            api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            temperature: 0.3,
            max_tokens: 8000,
            timeout_secs: 120,
            api_key: Secret::default(),
        }
    }
}

/// All settings for one process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub github: GitHubSettings,
    pub railway: RailwaySettings,
    pub llm: LlmSettings,
    pub orchestrator: OrchestratorConfig,
}

impl Settings {
    /// Load from `path` (which must exist) or from `shipwright.toml` in the
    /// working directory when present, then overlay the environment.
    pub fn load(path: Option<&Path>) -> ClientResult<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_SETTINGS_FILE);
                    Self::default()
                }
            }
        };
        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> ClientResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay environment values using `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(DEEPSEEK_API_KEY) {
            self.llm.api_key = Secret::new(key);
        }
        if let Some(token) = lookup(GITHUB_TOKEN) {
            self.github.token = Secret::new(token);
        }
        if let Some(key) = lookup(RAILWAY_API_KEY) {
            self.railway.api_key = Secret::new(key);
        }
        if let Some(repo) = lookup("SHIPWRIGHT_GITHUB_REPO").filter(|v| !v.is_empty()) {
            self.github.repo = repo;
        }
        if let Some(branch) = lookup("SHIPWRIGHT_GITHUB_BRANCH").filter(|v| !v.is_empty()) {
            self.github.branch = branch;
        }
        if let Some(project) = lookup("SHIPWRIGHT_RAILWAY_PROJECT_ID").filter(|v| !v.is_empty()) {
            self.railway.project_id = project;
        }
        if let Some(model) = lookup("SHIPWRIGHT_LLM_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
        self
    }

    /// Check everything a full run needs, reporting all missing values at once.
    pub fn validate(&self) -> ClientResult<()> {
        let mut missing = Vec::new();
        if !self.llm.api_key.is_set() {
            missing.push(DEEPSEEK_API_KEY.to_string());
        }
        if !self.github.token.is_set() {
            missing.push(GITHUB_TOKEN.to_string());
        }
        if !self.railway.api_key.is_set() {
            missing.push(RAILWAY_API_KEY.to_string());
        }
        if self.github.repo.trim().is_empty() {
            missing.push("github.repo".to_string());
        }
        if self.railway.project_id.trim().is_empty() {
            missing.push("railway.project_id".to_string());
        }
        if !missing.is_empty() {
            return Err(ClientError::MissingConfig(missing));
        }

        if self.github.repo == REPO_PLACEHOLDER {
            return Err(ClientError::InvalidConfig(
                "github.repo still has its placeholder value".to_string(),
            ));
        }
        if self.railway.project_id == PROJECT_PLACEHOLDER {
            return Err(ClientError::InvalidConfig(
                "railway.project_id still has its placeholder value".to_string(),
            ));
        }
        match self.github.repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => {
                return Err(ClientError::InvalidConfig(format!(
                    "github.repo must be owner/repo, got '{}'",
                    self.github.repo
                )))
            }
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ClientError::InvalidConfig(format!(
                "llm.temperature must be between 0 and 2, got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }
}
