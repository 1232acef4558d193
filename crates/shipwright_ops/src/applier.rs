//! Recursive operation applier.
//!
//! Walks an [`OperationTree`], sending leaves to the [`FileMutationExecutor`]
//! in array order. Containers are expanded in place: `MULTIPLE_OPERATIONS`
//! children and `NEEDS_RETRY` fixes go through the same recursive entry
//! point, so a fix list is handled exactly like a top-level tree.
//!
//! Leaf failures (`AlreadyExists`, `NotFound`) are recorded and the walk
//! continues with the next sibling. Fatal errors (transport, recursion
//! limit) abort the pass.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OpsError, OpsResult};
use crate::events::{EventSink, EventSinkExt};
use crate::executor::FileMutationExecutor;
use crate::operation::{Operation, OperationKind, OperationTree};
use crate::tree::TreeAccess;

/// Default ceiling on container nesting.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Outcome of one leaf operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LeafOutcome {
    Applied(String),
    Failed(String),
}

/// One line in the pass ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRecord {
    pub path: String,
    pub kind: OperationKind,
    pub outcome: LeafOutcome,
}

impl ApplyRecord {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, LeafOutcome::Applied(_))
    }
}

/// Non-mutating signals met during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum PassSignal {
    /// A `VERIFY_COMPLETE` node.
    Verified { message: Option<String> },
    /// A `NEEDS_RETRY` node and how many of its fixes were applied.
    RetryRequested {
        message: String,
        fixes: usize,
        applied: usize,
    },
}

/// Accumulated result of one pass.
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Leaf operations applied successfully.
    pub applied: usize,
    pub records: Vec<ApplyRecord>,
    pub signals: Vec<PassSignal>,
    /// Set when the pass stopped on a fatal error.
    pub aborted: Option<OpsError>,
}

impl ApplyResult {
    /// The pass ran to the end (leaf failures allowed).
    pub fn completed(&self) -> bool {
        self.aborted.is_none()
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| !r.succeeded()).count()
    }

    pub fn verified(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s, PassSignal::Verified { .. }))
    }

    pub fn retry_requested(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s, PassSignal::RetryRequested { .. }))
    }

    /// Turn an aborted pass into its error.
    pub fn into_result(self) -> OpsResult<Self> {
        match self.aborted {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn summary(&self) -> String {
        let mut summary = format!("{} applied, {} failed", self.applied, self.failed());
        if let Some(err) = &self.aborted {
            summary.push_str(&format!(", aborted: {}", err));
        }
        summary
    }
}

/// Applies operation trees to one target.
#[derive(Clone)]
pub struct OperationApplier {
    executor: FileMutationExecutor,
    events: Arc<dyn EventSink>,
    max_depth: usize,
}

impl OperationApplier {
    pub fn new(tree: Arc<dyn TreeAccess>, events: Arc<dyn EventSink>) -> Self {
        Self {
            executor: FileMutationExecutor::new(tree),
            events,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Apply a full tree. Never fails; fatal conditions are reported in
    /// [`ApplyResult::aborted`] after being emitted as error events.
    pub async fn apply(&self, tree: &OperationTree) -> ApplyResult {
        let mut result = ApplyResult::default();

        // Reject over-deep trees before touching anything.
        let depth = tree.depth();
        if depth > self.max_depth {
            let err = OpsError::RecursionLimitExceeded {
                limit: self.max_depth,
                depth,
            };
            self.events.error(format!("Rejected operations: {}", err));
            result.aborted = Some(err);
            return result;
        }

        if let Err(err) = self.apply_list(&tree.operations, 0, &mut result).await {
            self.events.error(format!("Pass aborted: {}", err));
            result.aborted = Some(err);
        }

        debug!("Pass finished: {}", result.summary());
        result
    }

    fn apply_list<'a>(
        &'a self,
        operations: &'a [Operation],
        depth: usize,
        result: &'a mut ApplyResult,
    ) -> BoxFuture<'a, OpsResult<()>> {
        async move {
            for operation in operations {
                self.apply_node(operation, depth, result).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn apply_node(
        &self,
        operation: &Operation,
        depth: usize,
        result: &mut ApplyResult,
    ) -> OpsResult<()> {
        match operation {
            Operation::MultipleOperations { operations } => {
                self.check_depth(operation, depth)?;
                let before = result.applied;
                self.apply_list(operations, depth + 1, result).await?;
                self.events.success(format!(
                    "Applied {} nested operations",
                    result.applied - before
                ));
            }
            Operation::NeedsRetry { message, fixes } => {
                self.check_depth(operation, depth)?;
                self.events.warning(format!("Issues found: {}", message));
                if fixes.is_empty() {
                    self.events.warning("No fixes specified; nothing to apply");
                    result.signals.push(PassSignal::RetryRequested {
                        message: message.clone(),
                        fixes: 0,
                        applied: 0,
                    });
                } else {
                    let before = result.applied;
                    self.apply_list(fixes, depth + 1, result).await?;
                    let applied = result.applied - before;
                    self.events.success(format!("Applied {} fixes", applied));
                    result.signals.push(PassSignal::RetryRequested {
                        message: message.clone(),
                        fixes: fixes.len(),
                        applied,
                    });
                }
            }
            Operation::VerifyComplete { message } => {
                self.events.status(format!(
                    "Verification passed{}",
                    message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
                ));
                result.signals.push(PassSignal::Verified {
                    message: message.clone(),
                });
            }
            leaf => {
                let path = leaf.path().unwrap_or_default().to_string();
                let kind = leaf.kind();
                match self.executor.execute(leaf).await {
                    Ok(effect) => {
                        result.applied += 1;
                        self.events
                            .success(format!("Applied {} {} ({})", kind, path, effect));
                        result.records.push(ApplyRecord {
                            path,
                            kind,
                            outcome: LeafOutcome::Applied(effect.to_string()),
                        });
                    }
                    Err(err) if !err.is_fatal() => {
                        self.events
                            .error(format!("Failed to apply {} {}: {}", kind, path, err));
                        result.records.push(ApplyRecord {
                            path,
                            kind,
                            outcome: LeafOutcome::Failed(err.to_string()),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    fn check_depth(&self, container: &Operation, depth: usize) -> OpsResult<()> {
        let reached = depth + container.depth();
        if reached > self.max_depth {
            return Err(OpsError::RecursionLimitExceeded {
                limit: self.max_depth,
                depth: reached,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventCategory, MemorySink};
    use crate::tree::InMemoryTree;

    fn applier(tree: &InMemoryTree) -> (OperationApplier, MemorySink) {
        let sink = MemorySink::new();
        let applier = OperationApplier::new(Arc::new(tree.clone()), Arc::new(sink.clone()));
        (applier, sink)
    }

    fn overwrite(path: &str, content: &str) -> Operation {
        Operation::OverwriteFile {
            path: path.into(),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn test_create_then_insert_sees_earlier_edit() {
        let tree = InMemoryTree::new("t");
        let (applier, _) = applier(&tree);
        let ops = OperationTree::single(Operation::MultipleOperations {
            operations: vec![
                Operation::CreateFile { path: "a.py".into(), content: "x=1".into() },
                Operation::InsertLines { path: "a.py".into(), line: 1, content: "# header".into() },
            ],
        });

        let result = applier.apply(&ops).await;

        assert_eq!(result.applied, 2);
        assert!(result.completed());
        assert_eq!(tree.get("a.py").as_deref(), Some("# header\nx=1"));
    }

    #[tokio::test]
    async fn test_fixes_are_applied_not_discarded() {
        let tree = InMemoryTree::new("t").with_file("app.py", "print(os)");
        let (applier, sink) = applier(&tree);
        let ops = OperationTree::single(Operation::NeedsRetry {
            message: "missing import".into(),
            fixes: vec![overwrite("app.py", "import os\n...")],
        });

        let result = applier.apply(&ops).await;

        assert_eq!(result.applied, 1);
        assert_eq!(tree.get("app.py").as_deref(), Some("import os\n..."));
        assert!(sink
            .messages(EventCategory::Warning)
            .iter()
            .any(|m| m.contains("missing import")));
        assert!(sink
            .messages(EventCategory::OperationSuccess)
            .contains(&"Applied 1 fixes".to_string()));
        assert_eq!(
            result.signals,
            vec![PassSignal::RetryRequested { message: "missing import".into(), fixes: 1, applied: 1 }]
        );
    }

    #[tokio::test]
    async fn test_fix_count_matches_applying_fixes_alone() {
        let fixes = vec![
            overwrite("a.py", "1"),
            Operation::MultipleOperations {
                operations: vec![
                    overwrite("b.py", "2"),
                    Operation::DeleteFile { path: "missing.py".into() },
                ],
            },
            Operation::InsertLines { path: "a.py".into(), line: 2, content: "3".into() },
        ];

        let wrapped_tree = InMemoryTree::new("wrapped");
        let (wrapped, _) = applier(&wrapped_tree);
        let wrapped_result = wrapped
            .apply(&OperationTree::single(Operation::NeedsRetry {
                message: "fix".into(),
                fixes: fixes.clone(),
            }))
            .await;

        let bare_tree = InMemoryTree::new("bare");
        let (bare, _) = applier(&bare_tree);
        let bare_result = bare.apply(&OperationTree::new(fixes)).await;

        assert_eq!(wrapped_result.applied, 3);
        assert_eq!(wrapped_result.applied, bare_result.applied);
        assert_eq!(wrapped_tree.snapshot(), bare_tree.snapshot());
    }

    #[tokio::test]
    async fn test_empty_fixes_warn_and_mutate_nothing() {
        let tree = InMemoryTree::new("t").with_file("a.py", "x");
        let (applier, sink) = applier(&tree);
        let before = tree.snapshot();

        let result = applier
            .apply(&OperationTree::single(Operation::NeedsRetry {
                message: "looks wrong".into(),
                fixes: vec![],
            }))
            .await;

        assert_eq!(result.applied, 0);
        assert!(result.records.is_empty());
        assert_eq!(tree.snapshot(), before);
        assert!(sink
            .messages(EventCategory::Warning)
            .iter()
            .any(|m| m.contains("No fixes")));
    }

    #[tokio::test]
    async fn test_leaf_failure_does_not_stop_siblings() {
        let tree = InMemoryTree::new("t").with_file("a.py", "old");
        let (applier, sink) = applier(&tree);
        let ops = OperationTree::new(vec![
            Operation::CreateFile { path: "a.py".into(), content: "new".into() },
            Operation::DeleteLines { path: "ghost.py".into(), start_line: 1, end_line: 2 },
            overwrite("b.py", "b"),
        ]);

        let result = applier.apply(&ops).await;

        assert!(result.completed());
        assert_eq!(result.applied, 1);
        assert_eq!(result.failed(), 2);
        assert_eq!(tree.get("b.py").as_deref(), Some("b"));
        assert_eq!(sink.messages(EventCategory::Error).len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_pass() {
        let tree = InMemoryTree::new("t");
        let (applier, _) = applier(&tree);
        tree.go_offline("connection refused");

        let result = applier
            .apply(&OperationTree::new(vec![overwrite("a.py", "1"), overwrite("b.py", "2")]))
            .await;

        assert!(!result.completed());
        assert!(matches!(result.aborted, Some(OpsError::Transport(_))));
        assert_eq!(result.applied, 0);
        assert!(result.records.is_empty());
    }

    fn nested_retries(levels: usize) -> Operation {
        let mut op = overwrite("deep.py", "bottom");
        for level in 0..levels {
            op = Operation::NeedsRetry {
                message: format!("level {}", level),
                fixes: vec![overwrite(&format!("level{}.py", level), "x"), op],
            };
        }
        op
    }

    #[tokio::test]
    async fn test_nesting_beyond_limit_is_rejected_without_mutation() {
        let tree = InMemoryTree::new("t");
        let (applier, _) = applier(&tree);

        let result = applier.apply(&OperationTree::single(nested_retries(11))).await;

        assert!(matches!(
            result.aborted,
            Some(OpsError::RecursionLimitExceeded { limit: 10, depth: 11 })
        ));
        assert_eq!(result.applied, 0);
        assert!(tree.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_nesting_at_limit_is_applied() {
        let tree = InMemoryTree::new("t");
        let (applier, _) = applier(&tree);

        let result = applier.apply(&OperationTree::single(nested_retries(10))).await;

        assert!(result.completed());
        assert_eq!(result.applied, 11);
        assert_eq!(tree.get("deep.py").as_deref(), Some("bottom"));
    }

    #[tokio::test]
    async fn test_verify_complete_is_a_signal_only() {
        let tree = InMemoryTree::new("t");
        let (applier, _) = applier(&tree);

        let result = applier
            .apply(&OperationTree::single(Operation::VerifyComplete {
                message: Some("ready".into()),
            }))
            .await;

        assert!(result.verified());
        assert_eq!(result.applied, 0);
        assert!(tree.snapshot().is_empty());
    }
}
