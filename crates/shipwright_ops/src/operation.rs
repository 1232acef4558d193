//! Operation model.
//!
//! An [`Operation`] is either a leaf that mutates exactly one path, or a
//! container (`MultipleOperations`, `NeedsRetry`) holding further operations.
//! The wire format is a JSON object tagged by an `operation` field, e.g.
//! `{"operation": "CREATE_FILE", "path": "a.py", "content": "x=1"}`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single instruction from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    CreateFile {
        path: String,
        content: String,
    },
    OverwriteFile {
        path: String,
        content: String,
    },
    InsertLines {
        path: String,
        line: usize,
        content: String,
    },
    DeleteFile {
        path: String,
    },
    DeleteLines {
        path: String,
        start_line: usize,
        end_line: usize,
    },
    MultipleOperations {
        #[serde(default)]
        operations: Vec<Operation>,
    },
    NeedsRetry {
        #[serde(default)]
        message: String,
        #[serde(default)]
        fixes: Vec<Operation>,
    },
    VerifyComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Discriminant of an [`Operation`], used in records and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    CreateFile,
    OverwriteFile,
    InsertLines,
    DeleteFile,
    DeleteLines,
    MultipleOperations,
    NeedsRetry,
    VerifyComplete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        Self::CreateFile,
        Self::OverwriteFile,
        Self::InsertLines,
        Self::DeleteFile,
        Self::DeleteLines,
        Self::MultipleOperations,
        Self::NeedsRetry,
        Self::VerifyComplete,
    ];

    /// Wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFile => "CREATE_FILE",
            Self::OverwriteFile => "OVERWRITE_FILE",
            Self::InsertLines => "INSERT_LINES",
            Self::DeleteFile => "DELETE_FILE",
            Self::DeleteLines => "DELETE_LINES",
            Self::MultipleOperations => "MULTIPLE_OPERATIONS",
            Self::NeedsRetry => "NEEDS_RETRY",
            Self::VerifyComplete => "VERIFY_COMPLETE",
        }
    }

    /// Parse a wire tag, ignoring surrounding whitespace and case.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|k| k.as_str() == normalized)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::MultipleOperations | Self::NeedsRetry)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateFile { .. } => OperationKind::CreateFile,
            Self::OverwriteFile { .. } => OperationKind::OverwriteFile,
            Self::InsertLines { .. } => OperationKind::InsertLines,
            Self::DeleteFile { .. } => OperationKind::DeleteFile,
            Self::DeleteLines { .. } => OperationKind::DeleteLines,
            Self::MultipleOperations { .. } => OperationKind::MultipleOperations,
            Self::NeedsRetry { .. } => OperationKind::NeedsRetry,
            Self::VerifyComplete { .. } => OperationKind::VerifyComplete,
        }
    }

    /// Target path for leaf mutations.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::CreateFile { path, .. }
            | Self::OverwriteFile { path, .. }
            | Self::InsertLines { path, .. }
            | Self::DeleteFile { path }
            | Self::DeleteLines { path, .. } => Some(path),
            _ => None,
        }
    }

    /// True for operations that perform exactly one file mutation.
    pub fn is_leaf(&self) -> bool {
        self.path().is_some()
    }

    /// Children of a container operation.
    pub fn children(&self) -> &[Operation] {
        match self {
            Self::MultipleOperations { operations } => operations,
            Self::NeedsRetry { fixes, .. } => fixes,
            _ => &[],
        }
    }

    /// Number of container levels in this operation.
    ///
    /// Leaves and `VerifyComplete` have depth 0; a container is one level
    /// deeper than its deepest child.
    pub fn depth(&self) -> usize {
        match self {
            Self::MultipleOperations { .. } | Self::NeedsRetry { .. } => {
                1 + self.children().iter().map(Operation::depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Number of leaf operations anywhere below (and including) this node.
    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children().iter().map(Operation::leaf_count).sum()
        }
    }

    /// Short human description, e.g. `INSERT_LINES a.py:3`.
    pub fn describe(&self) -> String {
        match self {
            Self::InsertLines { path, line, .. } => format!("{} {}:{}", self.kind(), path, line),
            Self::DeleteLines {
                path,
                start_line,
                end_line,
            } => format!("{} {}:{}-{}", self.kind(), path, start_line, end_line),
            Self::MultipleOperations { operations } => {
                format!("{} ({} operations)", self.kind(), operations.len())
            }
            Self::NeedsRetry { fixes, .. } => format!("{} ({} fixes)", self.kind(), fixes.len()),
            other => match other.path() {
                Some(path) => format!("{} {}", other.kind(), path),
                None => other.kind().to_string(),
            },
        }
    }
}

/// The operations extracted from one model response.
///
/// The top-level `{"operations": [...]}` wrapper is represented by the root
/// list itself and does not count as a nesting level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTree {
    pub operations: Vec<Operation>,
}

impl OperationTree {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn single(operation: Operation) -> Self {
        Self {
            operations: vec![operation],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.operations.iter().map(Operation::depth).max().unwrap_or(0)
    }

    pub fn leaf_count(&self) -> usize {
        self.operations.iter().map(Operation::leaf_count).sum()
    }

    /// The first `VERIFY_COMPLETE` at the root, if any.
    pub fn verification(&self) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| matches!(op, Operation::VerifyComplete { .. }))
    }

    /// True when the response only signals success and requests no mutation.
    pub fn is_verified(&self) -> bool {
        self.verification().is_some() && self.leaf_count() == 0
    }
}

impl From<Vec<Operation>> for OperationTree {
    fn from(operations: Vec<Operation>) -> Self {
        Self::new(operations)
    }
}
