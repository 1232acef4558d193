//! Verification/retry orchestrator.
//!
//! An explicit state machine over [`Phase`]:
//!
//! ```text
//! GENERATE -> APPLY -> PRE_VERIFY -> DEPLOY -> MONITOR -> POST_VERIFY -> DONE
//!    ^                                 ^          |            |
//!    |                                 |          v            v
//!    +---------------------------------+------- RETRY <--------+
//! ```
//!
//! All run state lives in a [`RunRecord`], so each transition can be driven
//! and inspected on its own through [`Orchestrator::step`]. Cancellation is
//! checked before every transition and between deployment polls.

use std::sync::Arc;

use shipwright_ops::{
    format_codebase, parse_response, EventSink, EventSinkExt, OperationApplier, OperationTree,
    Operation, OpsError, ParsedResponse, TreeAccess,
};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::cancel::CancellationFlag;
use crate::collaborators::{
    Deployer, DeploymentHandle, DeploymentReport, DeploymentState, Generator, VerificationSubject,
};
use crate::config::{OrchestratorConfig, MAX_DURATION};
use crate::error::CoreError;
use crate::locks::TargetLocks;
use crate::prompts;
use crate::state::{FailureReason, Phase, RunOutcome, RunRecord};

/// Drives requests against one target tree.
pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    deployer: Arc<dyn Deployer>,
    tree: Arc<dyn TreeAccess>,
    events: Arc<dyn EventSink>,
    applier: OperationApplier,
    config: OrchestratorConfig,
    locks: TargetLocks,
    cancellation: CancellationFlag,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        deployer: Arc<dyn Deployer>,
        tree: Arc<dyn TreeAccess>,
        events: Arc<dyn EventSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let applier =
            OperationApplier::new(tree.clone(), events.clone()).with_max_depth(config.max_depth);
        Self {
            generator,
            deployer,
            tree,
            events,
            applier,
            config,
            locks: TargetLocks::new(),
            cancellation: CancellationFlag::new(),
        }
    }

    /// Share a lock registry with other orchestrators of the process.
    pub fn with_locks(mut self, locks: TargetLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one request to a terminal phase.
    ///
    /// Runs against the same target are serialized; the returned record
    /// carries the outcome and full transition history.
    pub async fn run(&self, request: &str) -> RunRecord {
        let target = self.tree.target_id();
        let _guard = self.locks.acquire(&target).await;

        let mut record = RunRecord::new(request, target);
        info!("Starting run {} against {}", record.run_id, record.target);
        self.events
            .status(format!("Starting run {} against {}", record.run_id, record.target));
        self.persist(&record);

        while !record.is_finished() {
            self.step(&mut record).await;
            self.persist(&record);
        }

        match &record.outcome {
            Some(RunOutcome::Verified { .. }) => {
                self.events.success("Deployment verified; run complete")
            }
            Some(RunOutcome::NoChanges) => self.events.status("Run complete; no code changes made"),
            Some(RunOutcome::Failed { reason }) => {
                self.events.error(format!("Run failed: {}", reason))
            }
            None => {}
        }
        info!(
            "Run {} finished in {} after {} retries ({} operations applied)",
            record.run_id, record.phase, record.retries, record.total_applied
        );
        record
    }

    /// Perform the transition out of the record's current phase.
    pub async fn step(&self, record: &mut RunRecord) {
        if record.is_finished() {
            return;
        }
        if self.cancellation.is_cancelled() {
            self.cancel(record);
            return;
        }
        match record.phase {
            Phase::Generate => self.generate(record).await,
            Phase::Apply => self.apply(record).await,
            Phase::PreVerify => self.pre_verify(record).await,
            Phase::Deploy => self.deploy(record).await,
            Phase::Monitor => self.monitor(record).await,
            Phase::PostVerify => self.post_verify(record).await,
            Phase::Retry => self.retry(record),
            Phase::Done | Phase::Failed => {}
        }
    }

    async fn generate(&self, record: &mut RunRecord) {
        let context = match format_codebase(self.tree.as_ref()).await {
            Ok(context) => context,
            Err(err) => return self.transport_failure(record, err),
        };
        let prompt = match record.retry_context.take() {
            Some(failure) => prompts::retry_request(&record.request, &failure),
            None => record.request.clone(),
        };

        self.events.status("Generating code changes...");
        let text = match self.generator.generate(&prompt, &context).await {
            Ok(text) => text,
            Err(err) => {
                self.events.error(err.to_string());
                record.fail(FailureReason::Generation(err.to_string()));
                return;
            }
        };

        let parsed = parse_response(&text);
        self.report_validation(&parsed);

        if parsed.tree.is_empty() {
            if record.retries == 0 {
                self.events
                    .status("Response contained no code operations; nothing to apply");
                record.finish(RunOutcome::NoChanges);
            } else {
                record.last_error = Some("no operations in response".to_string());
                record.retry_context = Some(
                    "The previous response contained no operations. Respond with file operations in the JSON format."
                        .to_string(),
                );
                record.transition(Phase::Retry, Some("no operations".to_string()));
            }
            return;
        }

        let note = format!("{} operations", parsed.tree.leaf_count());
        record.pending = Some(parsed.tree);
        record.transition(Phase::Apply, Some(note));
    }

    async fn apply(&self, record: &mut RunRecord) {
        let Some(tree) = record.pending.take() else {
            record.transition(Phase::Generate, Some("nothing pending".to_string()));
            return;
        };

        self.events.status("Applying operations...");
        let mut result = self.applier.apply(&tree).await;
        record.total_applied += result.applied;
        let failed = result.failed();
        if let Some(err) = result.aborted.take() {
            return self.aborted_pass(record, err);
        }
        if failed > 0 {
            self.events
                .warning(format!("{} operations could not be applied", failed));
        }

        if result.applied == 0 {
            if record.retries == 0 && failed == 0 {
                self.events.status("No operations were applied");
                record.finish(RunOutcome::NoChanges);
            } else {
                let reason = format!("none of {} operations could be applied", failed);
                record.last_error = Some(reason.clone());
                record.retry_context = Some(format!(
                    "The previous operations could not be applied ({}). Check paths and line numbers against the current codebase.",
                    reason
                ));
                record.transition(Phase::Retry, Some(reason));
            }
            return;
        }

        self.events
            .status(format!("Successfully applied {} operations", result.applied));
        record.pre_verify_attempts = 0;
        let note = Some(format!("{} applied", result.applied));
        if self.config.max_pre_verify_attempts == 0 {
            record.transition(Phase::Deploy, note);
        } else {
            record.transition(Phase::PreVerify, note);
        }
    }

    async fn pre_verify(&self, record: &mut RunRecord) {
        let context = match format_codebase(self.tree.as_ref()).await {
            Ok(context) => context,
            Err(err) => return self.transport_failure(record, err),
        };

        self.events.status("Verifying changes before deployment...");
        let text = match self.generator.verify(&VerificationSubject::Tree { context }).await {
            Ok(text) => text,
            Err(err) => {
                self.events.warning(format!(
                    "Pre-deployment verification unavailable: {}; deploying anyway",
                    err
                ));
                record.transition(Phase::Deploy, Some("verification unavailable".to_string()));
                return;
            }
        };

        let parsed = parse_response(&text);
        self.report_validation(&parsed);
        if parsed.tree.is_empty() {
            self.events
                .warning("Verification returned no operations; deploying anyway");
            record.transition(Phase::Deploy, Some("no verification result".to_string()));
            return;
        }

        let mut result = self.applier.apply(&parsed.tree).await;
        record.total_applied += result.applied;
        if let Some(err) = result.aborted.take() {
            return self.aborted_pass(record, err);
        }

        if result.applied == 0 {
            if result.verified() {
                record.transition(Phase::Deploy, Some("verified".to_string()));
            } else {
                self.events
                    .warning("Verification requested changes but none were applied; deploying anyway");
                record.transition(Phase::Deploy, Some("no fixes applied".to_string()));
            }
            return;
        }

        self.events.status(format!(
            "Applied {} fixes based on verification feedback",
            result.applied
        ));
        record.pre_verify_attempts += 1;
        if record.pre_verify_attempts >= self.config.max_pre_verify_attempts {
            self.events.warning(format!(
                "Pre-deployment verification limit of {} reached; deploying unverified fixes",
                self.config.max_pre_verify_attempts
            ));
            record.transition(Phase::Deploy, Some("verification limit reached".to_string()));
        } else {
            record.transition(
                Phase::PreVerify,
                Some(format!("{} fixes applied", result.applied)),
            );
        }
    }

    async fn deploy(&self, record: &mut RunRecord) {
        self.events.status("Triggering deployment...");
        let handle = match self.deployer.trigger().await {
            Ok(handle) => handle,
            Err(err) => {
                self.events.warning(format!(
                    "Deployment trigger not confirmed: {}; monitoring latest deployment",
                    err
                ));
                DeploymentHandle::untracked()
            }
        };
        let note = handle.id.clone();
        record.deployment = Some(handle);
        record.transition(Phase::Monitor, note);
    }

    async fn monitor(&self, record: &mut RunRecord) {
        let handle = record
            .deployment
            .clone()
            .unwrap_or_else(DeploymentHandle::untracked);

        self.events.status("Waiting for deployment...");
        if !self.config.deployment_grace.is_zero() {
            sleep(self.config.deployment_grace).await;
        }

        let deadline = Instant::now() + self.config.deployment_timeout.min(MAX_DURATION);
        let mut last_seen: Option<String> = None;
        loop {
            if self.cancellation.is_cancelled() {
                self.cancel(record);
                return;
            }

            match self.deployer.poll_status(&handle).await {
                Ok(status) => {
                    if last_seen.as_deref() != Some(status.platform_status.as_str()) {
                        self.events
                            .status(format!("Deployment status: {}", status.platform_status));
                        last_seen = Some(status.platform_status.clone());
                    }
                    match status.state {
                        DeploymentState::Pending => {}
                        DeploymentState::Success => {
                            self.events.success("Deployment succeeded");
                            record.last_report = Some(DeploymentReport::from_status(&status));
                            record.transition(Phase::PostVerify, Some(status.platform_status));
                            return;
                        }
                        DeploymentState::Failure => {
                            let err = CoreError::DeploymentFailure(status.platform_status.clone());
                            self.events.error(err.to_string());
                            record.last_error = Some(err.to_string());
                            record.last_report = Some(DeploymentReport::from_status(&status));
                            record.transition(Phase::PostVerify, Some(status.platform_status));
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!("Deployment status poll failed: {}", err);
                    self.events
                        .warning(format!("Could not read deployment status: {}", err));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let secs = self.config.deployment_timeout.as_secs();
                let err = CoreError::DeploymentTimeout(secs);
                self.events.error(err.to_string());
                let report = DeploymentReport::timed_out(handle.id.clone(), secs);
                record.last_error = Some(err.to_string());
                record.retry_context = Some(prompts::deployment_failure(&report));
                record.last_report = Some(report);
                record.transition(Phase::Retry, Some("timeout".to_string()));
                return;
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn post_verify(&self, record: &mut RunRecord) {
        let Some(report) = record.last_report.clone() else {
            record.transition(Phase::Monitor, Some("no deployment report".to_string()));
            return;
        };

        if report.succeeded {
            self.events.status("Reviewing deployment logs...");
        } else {
            self.events.status("Sending deployment failure logs for analysis...");
        }
        let text = match self
            .generator
            .verify(&VerificationSubject::Deployment(report.clone()))
            .await
        {
            Ok(text) => text,
            Err(err) => {
                self.events.error(err.to_string());
                record.fail(FailureReason::Generation(err.to_string()));
                return;
            }
        };

        let parsed = parse_response(&text);
        self.report_validation(&parsed);
        let tree = parsed.tree;

        if report.succeeded && tree.is_verified() {
            let message = verification_message(&tree);
            record.finish(RunOutcome::Verified { message });
            return;
        }

        if tree.leaf_count() > 0 {
            self.events.status(format!(
                "Applying {} fixes from deployment review...",
                tree.leaf_count()
            ));
            let mut result = self.applier.apply(&tree).await;
            record.total_applied += result.applied;
            if let Some(err) = result.aborted.take() {
                return self.aborted_pass(record, err);
            }
            if result.applied > 0 {
                self.events.success(format!(
                    "Applied {} fixes from deployment review",
                    result.applied
                ));
                record.redeploy = true;
                record.transition(
                    Phase::Retry,
                    Some(format!("{} fixes applied", result.applied)),
                );
                return;
            }

            let reason = format!("none of {} review fixes could be applied", result.failed());
            self.events.warning(format!("Deployment review: {}", reason));
            let mut context = prompts::deployment_failure(&report);
            context.push_str(&format!(
                "\n\nThe suggested fixes could not be applied ({}). Check paths and line numbers against the current codebase.",
                reason
            ));
            record.last_error = Some(reason.clone());
            record.retry_context = Some(context);
            record.transition(Phase::Retry, Some(reason));
            return;
        }

        let issue = retry_message(&tree);
        if report.succeeded {
            let message = issue.unwrap_or_else(|| "no verdict in response".to_string());
            self.events
                .warning(format!("Deployment review found issues: {}", message));
            record.fail(FailureReason::UnresolvedIssues(message));
        } else {
            // Failed deployment without fixes: fall back to a fresh generation.
            let mut context = prompts::deployment_failure(&report);
            if let Some(issue) = issue {
                context.push_str(&format!("\n\nPrevious analysis: {}", issue));
            }
            record.retry_context = Some(context);
            record.transition(Phase::Retry, Some("no fixes supplied".to_string()));
        }
    }

    fn retry(&self, record: &mut RunRecord) {
        let redeploy = std::mem::take(&mut record.redeploy);
        if record.retries >= self.config.max_retries {
            if redeploy {
                self.events.warning(
                    "Fixes from the deployment review were applied but not deployed: retry budget exhausted",
                );
            }
            self.events
                .error(CoreError::RetryBudgetExhausted(self.config.max_retries).to_string());
            record.fail(FailureReason::RetryBudgetExhausted {
                retries: record.retries,
                last_error: record.last_error.clone(),
            });
            return;
        }

        record.retries += 1;
        self.events.status(format!(
            "Retry {}/{}",
            record.retries, self.config.max_retries
        ));
        if redeploy {
            record.transition(Phase::Deploy, Some("redeploying applied fixes".to_string()));
        } else {
            record.transition(Phase::Generate, Some("regenerating".to_string()));
        }
    }

    fn cancel(&self, record: &mut RunRecord) {
        self.events.error("Run cancelled");
        record.fail(FailureReason::Cancelled);
    }

    fn transport_failure(&self, record: &mut RunRecord, err: OpsError) {
        self.events
            .error(format!("Could not read target tree: {}", err));
        record.fail(FailureReason::Transport(err.to_string()));
    }

    /// A fatal pass error: over-deep trees are sent back to the model,
    /// tree access failures end the run.
    fn aborted_pass(&self, record: &mut RunRecord, err: OpsError) {
        match err {
            OpsError::RecursionLimitExceeded { .. } => {
                record.last_error = Some(err.to_string());
                record.retry_context = Some(format!(
                    "The previous response was rejected: {}. Respond with a flatter list of operations.",
                    err
                ));
                record.transition(Phase::Retry, Some(err.to_string()));
            }
            other => record.fail(FailureReason::Transport(other.to_string())),
        }
    }

    fn report_validation(&self, parsed: &ParsedResponse) {
        if parsed.nothing_found() {
            self.events.warning("No operations found in response");
        }
        for issue in &parsed.report.errors {
            self.events.error(format!("Invalid operation at {}", issue));
        }
        for issue in &parsed.report.warnings {
            self.events.warning(issue.to_string());
        }
    }

    fn persist(&self, record: &RunRecord) {
        if let Some(dir) = &self.config.runs_dir {
            if let Err(err) = record.save(dir) {
                warn!("Failed to save run record {}: {}", record.run_id, err);
            }
        }
    }
}

fn verification_message(tree: &OperationTree) -> Option<String> {
    match tree.verification() {
        Some(Operation::VerifyComplete { message }) => message.clone(),
        _ => None,
    }
}

fn retry_message(tree: &OperationTree) -> Option<String> {
    tree.operations.iter().find_map(|op| match op {
        Operation::NeedsRetry { message, .. } => Some(message.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shipwright_ops::{EventCategory, InMemoryTree, MemorySink};

    use super::*;
    use crate::collaborators::{DeploymentStatus, MockDeployer};
    use crate::error::CoreResult;

    /// Replays canned responses in order.
    #[derive(Default)]
    struct ScriptedGenerator {
        generated: Mutex<VecDeque<String>>,
        verified: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(generated: &[&str], verified: &[&str]) -> Self {
            Self {
                generated: Mutex::new(generated.iter().map(|s| s.to_string()).collect()),
                verified: Mutex::new(verified.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _tree_context: &str) -> CoreResult<String> {
            self.prompts.lock().push(prompt.to_string());
            self.generated
                .lock()
                .pop_front()
                .ok_or_else(|| CoreError::Generation("script exhausted".into()))
        }

        async fn verify(&self, subject: &VerificationSubject) -> CoreResult<String> {
            self.prompts.lock().push(prompts::verification_prompt(subject));
            self.verified
                .lock()
                .pop_front()
                .ok_or_else(|| CoreError::Generation("script exhausted".into()))
        }
    }

    const VERIFIED: &str = r#"{"operation": "VERIFY_COMPLETE", "message": "looks good"}"#;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_deployment_grace(Duration::ZERO)
            .with_deployment_timeout(Duration::from_millis(200))
    }

    fn success_deployer() -> MockDeployer {
        let mut deployer = MockDeployer::new();
        deployer
            .expect_trigger()
            .times(1)
            .returning(|| Ok(DeploymentHandle::tracked("dep-1")));
        deployer.expect_poll_status().times(1).returning(|_| {
            Ok(DeploymentStatus::finished(
                DeploymentState::Success,
                "SUCCESS",
                vec!["Server listening on :8080".into()],
            )
            .with_deployment_id("dep-1"))
        });
        deployer
    }

    fn orchestrator(
        generator: ScriptedGenerator,
        deployer: MockDeployer,
        tree: &InMemoryTree,
        config: OrchestratorConfig,
    ) -> (Orchestrator, MemorySink) {
        let sink = MemorySink::new();
        let orchestrator = Orchestrator::new(
            Arc::new(generator),
            Arc::new(deployer),
            Arc::new(tree.clone()),
            Arc::new(sink.clone()),
            config,
        );
        (orchestrator, sink)
    }

    #[tokio::test]
    async fn test_happy_path_reaches_done() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(
            &[r#"{"operation": "CREATE_FILE", "path": "main.py", "content": "print('hi')"}"#],
            &[VERIFIED, VERIFIED],
        );
        let (orchestrator, _) = orchestrator(generator, success_deployer(), &tree, fast_config());

        let record = orchestrator.run("say hi").await;

        assert_eq!(record.phase, Phase::Done);
        assert_eq!(
            record.outcome,
            Some(RunOutcome::Verified { message: Some("looks good".into()) })
        );
        assert_eq!(
            record.phases(),
            vec![
                Phase::Generate,
                Phase::Apply,
                Phase::PreVerify,
                Phase::Deploy,
                Phase::Monitor,
                Phase::PostVerify,
                Phase::Done
            ]
        );
        assert_eq!(tree.get("main.py").as_deref(), Some("print('hi')"));
    }

    #[tokio::test]
    async fn test_needs_retry_fixes_are_applied_then_deployed() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(
            &[r#"{"operation":"NEEDS_RETRY","message":"missing import","fixes":[{"operation":"OVERWRITE_FILE","path":"app.py","content":"import os\n..."}]}"#],
            &[VERIFIED],
        );
        let (orchestrator, _) = orchestrator(generator, MockDeployer::new(), &tree, fast_config());
        let mut record = RunRecord::new("fix app", "memory:t");

        orchestrator.step(&mut record).await;
        orchestrator.step(&mut record).await;
        assert_eq!(record.total_applied, 1);
        assert_eq!(tree.get("app.py").as_deref(), Some("import os\n..."));

        orchestrator.step(&mut record).await;
        assert_eq!(record.phase, Phase::Deploy);
    }

    #[tokio::test]
    async fn test_conversational_response_is_no_change() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(&["Sure, what should the app do?"], &[]);
        let mut deployer = MockDeployer::new();
        deployer.expect_trigger().never();
        let (orchestrator, sink) = orchestrator(generator, deployer, &tree, fast_config());

        let record = orchestrator.run("hello").await;

        assert_eq!(record.outcome, Some(RunOutcome::NoChanges));
        assert!(sink
            .messages(EventCategory::Warning)
            .contains(&"No operations found in response".to_string()));
    }

    #[tokio::test]
    async fn test_pre_verify_is_bounded() {
        let tree = InMemoryTree::new("t");
        let fix = r#"{"operation":"NEEDS_RETRY","message":"again","fixes":[{"operation":"OVERWRITE_FILE","path":"a.py","content":"v"}]}"#;
        let generator = ScriptedGenerator::new(
            &[r#"{"operation":"CREATE_FILE","path":"a.py","content":"v0"}"#],
            &[fix, fix, VERIFIED],
        );
        let (orchestrator, sink) = orchestrator(
            generator,
            success_deployer(),
            &tree,
            fast_config().with_max_pre_verify_attempts(2),
        );

        let record = orchestrator.run("a").await;

        assert_eq!(record.phase, Phase::Done);
        let pre_verifies = record
            .history
            .iter()
            .filter(|t| t.to == Phase::PreVerify)
            .count();
        assert_eq!(pre_verifies, 2);
        assert!(sink
            .messages(EventCategory::Warning)
            .iter()
            .any(|m| m.contains("verification limit")));
    }

    #[tokio::test]
    async fn test_failed_deployment_fixes_are_applied_then_redeployed() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(
            &[r#"{"operation":"CREATE_FILE","path":"app.py","content":"boom"}"#],
            &[
                VERIFIED,
                r#"{"operation":"NEEDS_RETRY","message":"crash","fixes":[{"operation":"OVERWRITE_FILE","path":"app.py","content":"ok"}]}"#,
                VERIFIED,
            ],
        );
        let mut deployer = MockDeployer::new();
        deployer
            .expect_trigger()
            .times(2)
            .returning(|| Ok(DeploymentHandle::tracked("dep-2")));
        let mut polls = 0;
        deployer.expect_poll_status().times(2).returning(move |_| {
            polls += 1;
            if polls == 1 {
                Ok(DeploymentStatus::finished(DeploymentState::Failure, "CRASHED", vec!["Traceback".into()]))
            } else {
                Ok(DeploymentStatus::finished(DeploymentState::Success, "SUCCESS", vec![]))
            }
        });
        let (orchestrator, _) = orchestrator(generator, deployer, &tree, fast_config());

        let record = orchestrator.run("app").await;

        assert_eq!(record.phase, Phase::Done);
        assert_eq!(record.retries, 1);
        assert_eq!(record.total_applied, 2);
        assert_eq!(tree.get("app.py").as_deref(), Some("ok"));
        let after_retry = record
            .history
            .iter()
            .find(|t| t.from == Phase::Retry)
            .map(|t| t.to);
        assert_eq!(after_retry, Some(Phase::Deploy));
    }

    #[tokio::test]
    async fn test_review_fixes_are_kept_when_budget_is_exhausted() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(
            &[r#"{"operation":"CREATE_FILE","path":"app.py","content":"boom"}"#],
            &[r#"{"operation":"NEEDS_RETRY","message":"crash","fixes":[{"operation":"OVERWRITE_FILE","path":"app.py","content":"fixed"}]}"#],
        );
        let mut deployer = MockDeployer::new();
        deployer
            .expect_trigger()
            .times(1)
            .returning(|| Ok(DeploymentHandle::tracked("dep-1")));
        deployer.expect_poll_status().times(1).returning(|_| {
            Ok(DeploymentStatus::finished(DeploymentState::Failure, "CRASHED", vec![]))
        });
        let (orchestrator, sink) = orchestrator(
            generator,
            deployer,
            &tree,
            fast_config()
                .with_max_retries(0)
                .with_max_pre_verify_attempts(0),
        );

        let record = orchestrator.run("app").await;

        assert_eq!(
            record.phases(),
            vec![
                Phase::Generate,
                Phase::Apply,
                Phase::Deploy,
                Phase::Monitor,
                Phase::PostVerify,
                Phase::Retry,
                Phase::Failed
            ]
        );
        assert_eq!(tree.get("app.py").as_deref(), Some("fixed"));
        assert_eq!(record.total_applied, 2);
        assert!(sink
            .messages(EventCategory::Warning)
            .iter()
            .any(|m| m.contains("applied but not deployed")));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails() {
        let tree = InMemoryTree::new("t");
        let crash_fix = r#"{"operation":"NEEDS_RETRY","message":"crash","fixes":[{"operation":"OVERWRITE_FILE","path":"app.py","content":"x"}]}"#;
        let generator = ScriptedGenerator::new(
            &[r#"{"operation":"CREATE_FILE","path":"app.py","content":"v"}"#],
            &[crash_fix; 8],
        );
        let mut deployer = MockDeployer::new();
        deployer
            .expect_trigger()
            .times(2)
            .returning(|| Ok(DeploymentHandle::untracked()));
        deployer.expect_poll_status().times(2).returning(|_| {
            Ok(DeploymentStatus::finished(DeploymentState::Failure, "FAILED", vec![]))
        });
        let (orchestrator, _) = orchestrator(
            generator,
            deployer,
            &tree,
            fast_config()
                .with_max_retries(1)
                .with_max_pre_verify_attempts(0),
        );

        let record = orchestrator.run("app").await;

        assert_eq!(record.phase, Phase::Failed);
        assert!(matches!(
            record.outcome,
            Some(RunOutcome::Failed {
                reason: FailureReason::RetryBudgetExhausted { retries: 1, .. }
            })
        ));
        assert_eq!(tree.get("app.py").as_deref(), Some("x"));
        assert_eq!(record.total_applied, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_failure() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(&[], &[]);
        let mut deployer = MockDeployer::new();
        deployer
            .expect_poll_status()
            .returning(|_| Ok(DeploymentStatus::pending("BUILDING")));
        let (orchestrator, sink) = orchestrator(
            generator,
            deployer,
            &tree,
            fast_config().with_deployment_timeout(Duration::from_millis(20)),
        );
        let mut record = RunRecord::new("x", "memory:t");
        record.transition(Phase::Monitor, None);
        record.deployment = Some(DeploymentHandle::tracked("dep-9"));

        orchestrator.step(&mut record).await;

        assert_eq!(record.phase, Phase::Retry);
        assert_eq!(record.last_report.as_ref().map(|r| r.status.as_str()), Some("TIMEOUT"));
        assert!(record
            .retry_context
            .as_deref()
            .is_some_and(|c| c.contains("TIMEOUT")));
        assert!(sink
            .messages(EventCategory::Error)
            .iter()
            .any(|m| m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let tree = InMemoryTree::new("t");
        let generator = ScriptedGenerator::new(&[], &[]);
        let mut deployer = MockDeployer::new();
        deployer
            .expect_poll_status()
            .times(1)
            .returning(|_| Ok(DeploymentStatus::finished(DeploymentState::Success, "SUCCESS", vec![])));
        let mut config = fast_config();
        config.deployment_timeout = Duration::MAX;
        let (orchestrator, _) = orchestrator(generator, deployer, &tree, config);
        let mut record = RunRecord::new("x", "memory:t");
        record.transition(Phase::Monitor, None);
        record.deployment = Some(DeploymentHandle::tracked("dep-1"));

        orchestrator.step(&mut record).await;

        assert_eq!(record.phase, Phase::PostVerify);
    }

    #[tokio::test]
    async fn test_trigger_failure_is_a_warning() {
        let tree = InMemoryTree::new("t");
        let mut deployer = MockDeployer::new();
        deployer
            .expect_trigger()
            .returning(|| Err(CoreError::Deployment("unauthorized".into())));
        let (orchestrator, sink) =
            orchestrator(ScriptedGenerator::default(), deployer, &tree, fast_config());
        let mut record = RunRecord::new("x", "memory:t");
        record.transition(Phase::Deploy, None);

        orchestrator.step(&mut record).await;

        assert_eq!(record.phase, Phase::Monitor);
        assert_eq!(record.deployment.as_ref().and_then(|h| h.id.clone()), None);
        assert_eq!(sink.messages(EventCategory::Warning).len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_transition() {
        let tree = InMemoryTree::new("t");
        let mut deployer = MockDeployer::new();
        deployer.expect_trigger().never();
        let generator = ScriptedGenerator::new(
            &[r#"{"operation":"CREATE_FILE","path":"a.py","content":"x"}"#],
            &[],
        );
        let (orchestrator, _) = orchestrator(generator, deployer, &tree, fast_config());
        let mut record = RunRecord::new("x", "memory:t");

        orchestrator.step(&mut record).await;
        orchestrator.cancellation().cancel();
        orchestrator.step(&mut record).await;

        assert_eq!(record.phase, Phase::Failed);
        assert_eq!(
            record.outcome,
            Some(RunOutcome::Failed { reason: FailureReason::Cancelled })
        );
        assert!(tree.get("a.py").is_none());
    }

    #[tokio::test]
    async fn test_over_deep_response_goes_back_to_the_model() {
        let tree = InMemoryTree::new("t");
        let mut nested = r#"{"operation":"OVERWRITE_FILE","path":"x.py","content":"x"}"#.to_string();
        for _ in 0..3 {
            nested = format!(
                r#"{{"operation":"NEEDS_RETRY","message":"m","fixes":[{}]}}"#,
                nested
            );
        }
        let generator = ScriptedGenerator::new(&[nested.as_str()], &[]);
        let (orchestrator, _) = orchestrator(
            generator,
            MockDeployer::new(),
            &tree,
            fast_config().with_max_depth(2),
        );
        let mut record = RunRecord::new("x", "memory:t");

        orchestrator.step(&mut record).await;
        orchestrator.step(&mut record).await;

        assert_eq!(record.phase, Phase::Retry);
        assert!(tree.get("x.py").is_none());
        assert!(record
            .retry_context
            .as_deref()
            .is_some_and(|c| c.contains("flatter")));
    }
}
