//! Tree access over a local directory.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{OpsError, OpsResult};
use crate::lines::line_count;
use crate::tree::{FileEntry, TreeAccess};

/// A working copy on disk.
///
/// Writes go to a temporary file in the destination directory which is then
/// renamed over the target, so readers never see a half-written file.
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn not_found_or_io(path: &str, err: std::io::Error) -> OpsError {
    if err.kind() == ErrorKind::NotFound {
        OpsError::NotFound(path.to_string())
    } else if err.kind() == ErrorKind::InvalidData {
        OpsError::Unreadable(path.to_string())
    } else {
        OpsError::Io(err)
    }
}

#[async_trait]
impl TreeAccess for LocalTree {
    fn target_id(&self) -> String {
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        format!("local:{}", root.display())
    }

    async fn read_file(&self, path: &str) -> OpsResult<String> {
        let full = self.resolve(path);
        if full.is_dir() {
            return Err(OpsError::NotFound(path.to_string()));
        }
        fs::read_to_string(&full).map_err(|e| not_found_or_io(path, e))
    }

    async fn write_file(&self, path: &str, content: &str, message: &str) -> OpsResult<()> {
        let full = self.resolve(path);
        let parent = full.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut staged = tempfile::NamedTempFile::new_in(parent)?;
        staged.write_all(content.as_bytes())?;
        staged.flush()?;
        staged.persist(&full).map_err(|e| OpsError::Io(e.error))?;

        debug!("{} ({} bytes)", message, content.len());
        Ok(())
    }

    async fn delete_file(&self, path: &str, message: &str) -> OpsResult<()> {
        let full = self.resolve(path);
        if full.is_dir() {
            return Err(OpsError::NotFound(path.to_string()));
        }
        fs::remove_file(&full).map_err(|e| not_found_or_io(path, e))?;
        debug!("{}", message);
        Ok(())
    }

    async fn list_files(&self) -> OpsResult<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker {
            let entry = entry.map_err(|e| OpsError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // Binary files are not part of the prompt context.
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            entries.push(FileEntry {
                path,
                line_count: line_count(&content),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
