//! Staging namespace shared by every job.
//!
//! The engine only sees files inside [`Workspace::root`]. Each job stages its
//! input there, lets the engine write outputs next to it, reads them back and
//! removes everything it produced. [`JobScope`] hands out per-job names and
//! removes them again when it goes out of scope.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid workspace entry name: {0:?}")]
    InvalidName(String),

    #[error("workspace entry not found: {0}")]
    Missing(String),

    #[error("workspace I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| WorkspaceError::io(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(WorkspaceError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), WorkspaceError> {
        let path = self.path_of(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| WorkspaceError::io(name, e))?;
        debug!("Staged {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    pub async fn read(&self, name: &str) -> Result<Bytes, WorkspaceError> {
        let path = self.path_of(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(WorkspaceError::Missing(name.to_string()))
            }
            Err(e) => Err(WorkspaceError::io(name, e)),
        }
    }

    /// Removing an entry that does not exist is not an error.
    pub async fn remove(&self, name: &str) -> Result<(), WorkspaceError> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(name, e)),
        }
    }

    /// Names of every entry currently staged, sorted.
    pub fn entries(&self) -> Result<Vec<String>, WorkspaceError> {
        let dir = fs::read_dir(&self.root)
            .map_err(|e| WorkspaceError::io(&self.root.display().to_string(), e))?;

        let mut names: Vec<String> = dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Removes every entry whose name starts with `prefix` without blocking
    /// the runtime. Failures are logged, not returned.
    pub async fn clear_prefixed(&self, prefix: &str) -> usize {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Failed to list workspace for cleanup: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list workspace for cleanup: {}", e);
                    break;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove workspace entry {}: {}", name, e),
            }
        }
        removed
    }

    /// Blocking twin of [`Workspace::clear_prefixed`] for `Drop` and startup.
    pub fn remove_prefixed(&self, prefix: &str) -> usize {
        let names = match self.entries() {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list workspace for cleanup: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for name in names.iter().filter(|n| n.starts_with(prefix)) {
            match fs::remove_file(self.root.join(name)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove workspace entry {}: {}", name, e),
            }
        }
        removed
    }

    /// Clears entries left behind by a previous process.
    pub fn purge(&self) -> usize {
        self.remove_prefixed("")
    }

    pub fn scope(self: &Arc<Self>) -> JobScope {
        JobScope::new(Arc::clone(self))
    }
}

/// Per-job naming and cleanup.
///
/// Every name produced by [`JobScope::name`] carries the job's unique prefix,
/// so closing the scope removes inputs, the outputs the job read and any
/// outputs the engine produced that were never read. A scope dropped without
/// [`JobScope::close`], as when a request is cancelled mid-job, falls back to a
/// blocking sweep.
#[derive(Debug)]
pub struct JobScope {
    workspace: Arc<Workspace>,
    id: String,
    closed: bool,
}

impl JobScope {
    fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            id: Uuid::new_v4().simple().to_string(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self, suffix: &str) -> String {
        format!("{}-{}", self.id, suffix)
    }

    fn prefix(&self) -> String {
        format!("{}-", self.id)
    }

    pub async fn close(mut self) -> usize {
        let removed = self.workspace.clear_prefixed(&self.prefix()).await;
        self.closed = true;
        debug!("[Job {}] Removed {} workspace entries", self.id, removed);
        removed
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let removed = self.workspace.remove_prefixed(&self.prefix());
        debug!("[Job {}] Removed {} workspace entries on drop", self.id, removed);
    }
}
