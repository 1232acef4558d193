//! Run state: phases, outcomes and the persisted run record.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipwright_ops::OperationTree;
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::{DeploymentHandle, DeploymentReport};
use crate::error::{CoreError, CoreResult};

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Generate,
    Apply,
    PreVerify,
    Deploy,
    Monitor,
    PostVerify,
    Retry,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Generate => "GENERATE",
            Phase::Apply => "APPLY",
            Phase::PreVerify => "PRE_VERIFY",
            Phase::Deploy => "DEPLOY",
            Phase::Monitor => "MONITOR",
            Phase::PostVerify => "POST_VERIFY",
            Phase::Retry => "RETRY",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    Generation(String),
    Transport(String),
    /// Deployment review reported problems but supplied no fixes.
    UnresolvedIssues(String),
    RetryBudgetExhausted { retries: u32, last_error: Option<String> },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Generation(msg) => write!(f, "generation failed: {}", msg),
            FailureReason::Transport(msg) => write!(f, "transport failure: {}", msg),
            FailureReason::UnresolvedIssues(msg) => write!(f, "issues reported without fixes: {}", msg),
            FailureReason::RetryBudgetExhausted { retries, last_error } => {
                write!(f, "retry budget exhausted after {} retries", retries)?;
                if let Some(err) = last_error {
                    write!(f, " (last error: {})", err)?;
                }
                Ok(())
            }
        }
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The deployment was verified by the model.
    Verified { message: Option<String> },
    /// The model proposed nothing to change.
    NoChanges,
    Failed { reason: FailureReason },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed { .. })
    }
}

/// One phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Explicit state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub request: String,
    /// Identity of the target tree
    pub target: String,
    pub phase: Phase,
    /// Completed retry cycles
    pub retries: u32,
    /// Pre-verification rounds in the current cycle
    pub pre_verify_attempts: u32,
    /// Leaf operations applied over the whole run
    pub total_applied: usize,
    /// Operations waiting for the next `APPLY`
    pub pending: Option<OperationTree>,
    /// Failure context for the next generation prompt
    pub retry_context: Option<String>,
    /// Review fixes were applied and wait for the next deployment
    #[serde(default)]
    pub redeploy: bool,
    /// Most recent failure seen, kept for the final report
    pub last_error: Option<String>,
    pub deployment: Option<DeploymentHandle>,
    pub last_report: Option<DeploymentReport>,
    pub history: Vec<Transition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<RunOutcome>,
}

impl RunRecord {
    pub fn new(request: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request: request.into(),
            target: target.into(),
            phase: Phase::Generate,
            retries: 0,
            pre_verify_attempts: 0,
            total_applied: 0,
            pending: None,
            retry_context: None,
            redeploy: false,
            last_error: None,
            deployment: None,
            last_report: None,
            history: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }

    /// Move to `to`, recording the transition.
    pub fn transition(&mut self, to: Phase, note: Option<String>) {
        debug!("Run {}: {} -> {}", self.run_id, self.phase, to);
        self.history.push(Transition {
            from: self.phase,
            to,
            at: Utc::now(),
            note,
        });
        self.phase = to;
    }

    /// Enter `DONE` or `FAILED` with the given outcome.
    pub fn finish(&mut self, outcome: RunOutcome) {
        let phase = if outcome.is_success() {
            Phase::Done
        } else {
            Phase::Failed
        };
        let note = match &outcome {
            RunOutcome::Failed { reason } => Some(reason.to_string()),
            _ => None,
        };
        self.transition(phase, note);
        self.pending = None;
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.finish(RunOutcome::Failed { reason });
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Phases visited, starting with the initial one.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = vec![self
            .history
            .first()
            .map(|t| t.from)
            .unwrap_or(self.phase)];
        phases.extend(self.history.iter().map(|t| t.to));
        phases
    }

    pub fn record_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.run_id))
    }

    /// Save the record as `<dir>/<run_id>.json`.
    pub fn save(&self, dir: &Path) -> CoreResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = self.record_path(dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        fs::write(&path, json)?;
        debug!("Saved run record to {:?}", path);
        Ok(path)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_transitions_are_recorded() {
        let mut record = RunRecord::new("add a route", "memory:t");
        record.transition(Phase::Apply, None);
        record.transition(Phase::PreVerify, Some("3 applied".into()));

        assert_eq!(record.phase, Phase::PreVerify);
        assert_eq!(
            record.phases(),
            vec![Phase::Generate, Phase::Apply, Phase::PreVerify]
        );
        assert_eq!(record.history[1].note.as_deref(), Some("3 applied"));
    }

    #[test]
    fn test_fail_sets_terminal_state() {
        let mut record = RunRecord::new("x", "memory:t");
        record.fail(FailureReason::Cancelled);

        assert!(record.is_finished());
        assert_eq!(record.phase, Phase::Failed);
        assert!(record.finished_at.is_some());
        assert_eq!(record.history.last().and_then(|t| t.note.as_deref()), Some("cancelled"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let mut record = RunRecord::new("x", "memory:t");
        record.retries = 2;
        record.finish(RunOutcome::Verified { message: Some("ok".into()) });

        let path = record.save(temp.path()).unwrap();
        assert!(path.ends_with(format!("{}.json", record.run_id)));

        let loaded = RunRecord::load(&path).unwrap();
        assert_eq!(loaded.run_id, record.run_id);
        assert_eq!(loaded.retries, 2);
        assert_eq!(loaded.phase, Phase::Done);
    }

    #[test]
    fn test_load_errors() {
        let temp = tempdir().unwrap();
        let missing = RunRecord::load(&temp.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, CoreError::Io(_)));

        let corrupt = temp.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(matches!(RunRecord::load(&corrupt), Err(CoreError::Serialization(_))));
    }

    #[test]
    fn test_budget_reason_display() {
        let reason = FailureReason::RetryBudgetExhausted {
            retries: 3,
            last_error: Some("CRASHED".into()),
        };
        assert_eq!(
            reason.to_string(),
            "retry budget exhausted after 3 retries (last error: CRASHED)"
        );
    }
}
