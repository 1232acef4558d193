//! File-mutation executor: applies one leaf operation to a tree.

use std::sync::Arc;

use tracing::debug;

use crate::error::{OpsError, OpsResult};
use crate::lines::Lines;
use crate::operation::Operation;
use crate::tree::TreeAccess;

/// What a successful leaf did to its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafEffect {
    Created,
    Overwritten,
    LinesInserted(usize),
    LinesDeleted(usize),
    Deleted,
}

impl std::fmt::Display for LeafEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Overwritten => write!(f, "overwritten"),
            Self::LinesInserted(n) => write!(f, "{} line(s) inserted", n),
            Self::LinesDeleted(n) => write!(f, "{} line(s) deleted", n),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Applies leaf operations against a [`TreeAccess`] capability.
///
/// Each successful mutation is exactly one `write_file` or `delete_file`
/// call; line edits read the whole file, edit it in memory and write it back.
#[derive(Clone)]
pub struct FileMutationExecutor {
    tree: Arc<dyn TreeAccess>,
}

impl FileMutationExecutor {
    pub fn new(tree: Arc<dyn TreeAccess>) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &Arc<dyn TreeAccess> {
        &self.tree
    }

    /// Apply a single leaf. Containers and `VERIFY_COMPLETE` are rejected.
    pub async fn execute(&self, operation: &Operation) -> OpsResult<LeafEffect> {
        debug!("Executing {}", operation.describe());
        match operation {
            Operation::CreateFile { path, content } => {
                if self.tree.exists(path).await? {
                    return Err(OpsError::AlreadyExists(path.clone()));
                }
                self.tree
                    .write_file(path, content, &format!("Create {}", path))
                    .await?;
                Ok(LeafEffect::Created)
            }
            Operation::OverwriteFile { path, content } => {
                self.tree
                    .write_file(path, content, &format!("Update {}", path))
                    .await?;
                Ok(LeafEffect::Overwritten)
            }
            Operation::InsertLines { path, line, content } => {
                let current = self.tree.read_file(path).await?;
                let mut lines = Lines::parse(&current);
                let before = lines.len();
                lines.insert_before(*line, content);
                let inserted = lines.len() - before;
                self.tree
                    .write_file(
                        path,
                        &lines.render(),
                        &format!("Insert lines in {} at line {}", path, line),
                    )
                    .await?;
                Ok(LeafEffect::LinesInserted(inserted))
            }
            Operation::DeleteFile { path } => {
                self.tree.delete_file(path, &format!("Delete {}", path)).await?;
                Ok(LeafEffect::Deleted)
            }
            Operation::DeleteLines {
                path,
                start_line,
                end_line,
            } => {
                let current = self.tree.read_file(path).await?;
                let mut lines = Lines::parse(&current);
                let removed = lines.delete_range(*start_line, *end_line);
                if removed > 0 {
                    self.tree
                        .write_file(
                            path,
                            &lines.render(),
                            &format!("Delete lines {}-{} from {}", start_line, end_line, path),
                        )
                        .await?;
                }
                Ok(LeafEffect::LinesDeleted(removed))
            }
            Operation::MultipleOperations { .. }
            | Operation::NeedsRetry { .. }
            | Operation::VerifyComplete { .. } => Err(OpsError::NotALeaf(operation.kind().to_string())),
        }
    }
}
