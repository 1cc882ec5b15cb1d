//! Per-run workspace allocation under a process-wide scratch root.
//!
//! Collision-free run identifiers are the only concurrency-safety
//! mechanism: every worker touches exactly one uuid-named subdirectory,
//! so no cross-worker locking exists anywhere in the engine.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;

/// The scratch root every workspace lives under.
///
/// Constructed once at startup and injected into the engine; the directory
/// itself is created lazily and idempotently on first use and never torn
/// down except by process exit.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    path: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WorkspaceRoot { path: path.into() }
    }

    /// `<system temp>/crucible-sandbox`
    pub fn default_root() -> Self {
        WorkspaceRoot::new(std::env::temp_dir().join("crucible-sandbox"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Allocate a fresh, uniquely-named workspace directory.
    pub async fn create_workspace(&self) -> Result<Workspace, EngineError> {
        self.ensure().await?;

        let run_id = Uuid::new_v4();
        let dir = self.path.join(run_id.to_string());

        // create_dir (not create_dir_all): the run directory must not
        // already exist. A collision here means a broken uuid source.
        fs::create_dir(&dir).await?;

        debug!(run_id = %run_id, dir = %dir.display(), "workspace created");

        Ok(Workspace { run_id, dir })
    }
}

/// One execution request's private directory. Exclusively owned by a single
/// worker for the lifetime of that request.
#[derive(Debug)]
pub struct Workspace {
    run_id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a file at a path relative to the workspace, creating parent
    /// directories as needed.
    pub async fn write_file(
        &self,
        relative: impl AsRef<Path>,
        contents: &str,
    ) -> Result<(), EngineError> {
        let path = self.dir.join(relative.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, contents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspaces_are_unique_under_concurrency() {
        let tmp = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(tmp.path());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let root = root.clone();
            handles.push(tokio::spawn(async move {
                root.create_workspace().await.unwrap().dir().to_path_buf()
            }));
        }

        let mut dirs = Vec::new();
        for handle in handles {
            dirs.push(handle.await.unwrap());
        }

        let unique: std::collections::HashSet<_> = dirs.iter().collect();
        assert_eq!(unique.len(), dirs.len());
        for dir in &dirs {
            assert!(dir.is_dir());
            assert!(dir.starts_with(tmp.path()));
        }
    }

    #[tokio::test]
    async fn test_workspaces_do_not_observe_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(tmp.path());

        let a = root.create_workspace().await.unwrap();
        let b = root.create_workspace().await.unwrap();

        a.write_file("only_in_a.txt", "a").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(b.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_write_file_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(tmp.path());
        let ws = root.create_workspace().await.unwrap();

        ws.write_file("tests/deep/run.test.js", "content").await.unwrap();

        let written = ws.dir().join("tests/deep/run.test.js");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "content");
    }

    #[tokio::test]
    async fn test_root_creation_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("scratch");
        let root = WorkspaceRoot::new(&nested);

        root.create_workspace().await.unwrap();
        root.create_workspace().await.unwrap();

        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_unwritable_root_errors() {
        let root = WorkspaceRoot::new("/proc/definitely-not-writable");
        let result = root.create_workspace().await;
        assert!(matches!(result, Err(EngineError::WorkspaceIo(_))));
    }
}
