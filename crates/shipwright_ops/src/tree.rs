//! Tree-access capability and its in-memory implementation.
//!
//! A tree is one snapshot of a repository addressed by stable,
//! repository-relative path strings. Remote implementations (e.g. a hosted
//! version-control API) live outside this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, OpsResult};
use crate::lines::line_count;

/// A file in a tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub line_count: usize,
}

/// Read/write access to one target tree.
///
/// Implementations return [`OpsError::NotFound`] for absent paths and
/// [`OpsError::Transport`] when the backing store cannot be reached.
#[async_trait]
pub trait TreeAccess: Send + Sync {
    /// Identity of the target, used to serialize writers.
    fn target_id(&self) -> String;

    /// Read the full content of `path`.
    async fn read_file(&self, path: &str) -> OpsResult<String>;

    /// Create or overwrite `path` with `content` in a single write.
    async fn write_file(&self, path: &str, content: &str, message: &str) -> OpsResult<()>;

    /// Delete `path`.
    async fn delete_file(&self, path: &str, message: &str) -> OpsResult<()>;

    /// All files in the tree, ordered by path.
    async fn list_files(&self) -> OpsResult<Vec<FileEntry>>;

    /// Whether `path` exists.
    async fn exists(&self, path: &str) -> OpsResult<bool> {
        match self.read_file(path).await {
            Ok(_) => Ok(true),
            Err(OpsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A tree held entirely in memory.
///
/// Cloning shares the underlying files, so a test can hand one clone to the
/// code under test and inspect the other.
#[derive(Clone, Default)]
pub struct InMemoryTree {
    name: String,
    files: Arc<RwLock<BTreeMap<String, String>>>,
    /// Simulated transport failure returned by every call.
    offline: Arc<RwLock<Option<String>>>,
}

impl InMemoryTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Seed a file.
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.write().insert(path.into(), content.into());
        self
    }

    /// Make every subsequent call fail with a transport error.
    pub fn go_offline(&self, reason: impl Into<String>) {
        *self.offline.write() = Some(reason.into());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.files.read().clone()
    }

    fn check_online(&self) -> OpsResult<()> {
        match self.offline.read().as_ref() {
            Some(reason) => Err(OpsError::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TreeAccess for InMemoryTree {
    fn target_id(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn read_file(&self, path: &str) -> OpsResult<String> {
        self.check_online()?;
        self.get(path).ok_or_else(|| OpsError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str, _message: &str) -> OpsResult<()> {
        self.check_online()?;
        self.files.write().insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn delete_file(&self, path: &str, _message: &str) -> OpsResult<()> {
        self.check_online()?;
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| OpsError::NotFound(path.to_string()))
    }

    async fn list_files(&self) -> OpsResult<Vec<FileEntry>> {
        self.check_online()?;
        Ok(self
            .files
            .read()
            .iter()
            .map(|(path, content)| FileEntry {
                path: path.clone(),
                line_count: line_count(content),
            })
            .collect())
    }
}
