//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipwright_ops::DEFAULT_MAX_DEPTH;

/// Longest accepted duration for any timing setting (one year).
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Limits and timings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum container nesting accepted from the model
    pub max_depth: usize,
    /// Pre-deployment review rounds before deploying anyway
    pub max_pre_verify_attempts: u32,
    /// Generate/apply/deploy cycles after the first before giving up
    pub max_retries: u32,
    /// Delay between deployment status polls
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// Wall-clock limit for one deployment to settle
    #[serde(with = "seconds")]
    pub deployment_timeout: Duration,
    /// Wait before the first poll so the platform can pick up the push
    #[serde(with = "seconds")]
    pub deployment_grace: Duration,
    /// Where run records are persisted (disabled when unset)
    pub runs_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_pre_verify_attempts: 2,
            max_retries: 3,
            poll_interval: Duration::from_secs(10),
            deployment_timeout: Duration::from_secs(15 * 60),
            deployment_grace: Duration::from_secs(5),
            runs_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pre_verify_attempts(mut self, attempts: u32) -> Self {
        self.max_pre_verify_attempts = attempts;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.min(MAX_DURATION);
        self
    }

    pub fn with_deployment_timeout(mut self, timeout: Duration) -> Self {
        self.deployment_timeout = timeout.min(MAX_DURATION);
        self
    }

    pub fn with_deployment_grace(mut self, grace: Duration) -> Self {
        self.deployment_grace = grace.min(MAX_DURATION);
        self
    }

    pub fn with_runs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(dir.into());
        self
    }
}

/// Durations as (fractional) seconds, so config files read naturally.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::MAX_DURATION;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        if secs > MAX_DURATION.as_secs_f64() {
            return Err(serde::de::Error::custom(format!(
                "duration of {} seconds exceeds the limit of {} seconds",
                secs,
                MAX_DURATION.as_secs()
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.deployment_timeout, Duration::from_secs(900));
        assert!(config.runs_dir.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"max_retries": 1, "poll_interval": 2.5}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.max_pre_verify_attempts, 2);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result = serde_json::from_str::<OrchestratorConfig>(r#"{"poll_interval": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_duration_rejected() {
        let result =
            serde_json::from_str::<OrchestratorConfig>(r#"{"deployment_timeout": 1e30}"#);
        assert!(result.unwrap_err().to_string().contains("exceeds the limit"));

        let config = OrchestratorConfig::default().with_deployment_timeout(Duration::MAX);
        assert_eq!(config.deployment_timeout, MAX_DURATION);
    }
}
