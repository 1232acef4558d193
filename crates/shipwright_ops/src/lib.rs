//! # shipwright_ops
//!
//! Operation handling for shipwright: turns free-form model output into a
//! validated operation tree and applies it to a target tree.
//!
//! # Pipeline
//!
//! - **Parser**: locates JSON payloads in prose or fenced blocks
//! - **Validator**: builds typed [`Operation`]s, isolating invalid children
//! - **Executor**: applies one leaf against a [`TreeAccess`] capability
//! - **Applier**: walks the tree recursively, fixes included
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shipwright_ops::{parse_response, InMemoryTree, OperationApplier, TracingSink};
//!
//! let parsed = parse_response(model_output);
//! let tree = Arc::new(InMemoryTree::new("scratch"));
//! let applier = OperationApplier::new(tree, Arc::new(TracingSink));
//! let result = applier.apply(&parsed.tree).await;
//! println!("{}", result.summary());
//! ```

pub mod applier;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod lines;
pub mod local;
pub mod operation;
pub mod parser;
pub mod tree;
pub mod validator;

pub use applier::{ApplyRecord, ApplyResult, LeafOutcome, OperationApplier, PassSignal, DEFAULT_MAX_DEPTH};
pub use context::{format_codebase, EMPTY_TREE};
pub use error::{OpsError, OpsResult};
pub use events::{
    ChannelSink, EventCategory, EventSink, EventSinkExt, FanoutSink, MemorySink, ProgressEvent,
    TracingSink,
};
pub use executor::{FileMutationExecutor, LeafEffect};
pub use lines::{line_count, Lines};
pub use local::LocalTree;
pub use operation::{Operation, OperationKind, OperationTree};
pub use parser::{RawTree, ResponseParser};
pub use tree::{FileEntry, InMemoryTree, TreeAccess};
pub use validator::{
    normalize_path, parse_response, OperationValidator, ParsedResponse, ValidatedTree,
    ValidationIssue, ValidationReport,
};
