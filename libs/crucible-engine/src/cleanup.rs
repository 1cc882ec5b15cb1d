//! Workspace reclamation after a run.
//!
//! Files inside a workspace may have been written by the sandbox's internal
//! user, so a plain recursive delete issued by this process can be refused
//! by the filesystem. The container strategy sidesteps that by issuing the
//! removal from inside a fresh minimal container that mounts only the
//! scratch root and deletes the one run directory by name.
//!
//! Cleanup is never allowed to fail a request: the caller already has its
//! result. Failures and timeouts are logged and abandoned.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, StartContainerOptions, WaitContainerOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{CleanupConfig, CleanupKind};
use crate::sandbox::ensure_image;
use crate::workspace::Workspace;

#[async_trait]
pub trait CleanupStrategy: Send + Sync {
    async fn remove(&self, workspace: &Workspace) -> Result<()>;
}

/// Plain recursive delete, for deployments where the sandbox writes files
/// as the calling user (e.g. rootless Docker).
pub struct DirectCleanup;

#[async_trait]
impl CleanupStrategy for DirectCleanup {
    async fn remove(&self, workspace: &Workspace) -> Result<()> {
        tokio::fs::remove_dir_all(workspace.dir())
            .await
            .with_context(|| format!("removing {}", workspace.dir().display()))
    }
}

/// Removal via a helper container that mounts the workspace's parent and
/// deletes the run directory with the sandbox-side privileges.
pub struct ContainerCleanup {
    docker: Docker,
    image: String,
}

impl ContainerCleanup {
    pub fn new(docker: Docker, image: String) -> Self {
        ContainerCleanup { docker, image }
    }
}

#[async_trait]
impl CleanupStrategy for ContainerCleanup {
    async fn remove(&self, workspace: &Workspace) -> Result<()> {
        let parent = workspace
            .dir()
            .parent()
            .context("workspace has no parent directory")?;
        let dir_name = workspace
            .dir()
            .file_name()
            .and_then(|name| name.to_str())
            .context("workspace has no directory name")?;

        ensure_image(&self.docker, &self.image).await?;

        let container_name = format!("crucible-cleanup-{}", workspace.run_id());
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "rm".to_string(),
                "-rf".to_string(),
                format!("/workspace/{}", dir_name),
            ]),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:/workspace", parent.display())]),
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(&container.id, Some(wait_options));
        if let Some(Ok(response)) = wait_stream.next().await {
            if response.status_code != 0 {
                anyhow::bail!("cleanup container exited with {}", response.status_code);
            }
        }

        Ok(())
    }
}

/// Build the configured strategy. The capability flag decides whether
/// removal needs sandbox-side privileges.
pub fn strategy_from_config(docker: &Docker, config: &CleanupConfig) -> Box<dyn CleanupStrategy> {
    match config.strategy {
        CleanupKind::Direct => Box::new(DirectCleanup),
        CleanupKind::Container => {
            Box::new(ContainerCleanup::new(docker.clone(), config.image.clone()))
        }
    }
}

/// Run the strategy under its own bounded timeout. Never propagates: a
/// cleanup that fails or hangs is logged and abandoned so workers cannot
/// pile up behind a stuck removal.
pub async fn cleanup_workspace(
    strategy: &dyn CleanupStrategy,
    workspace: &Workspace,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, strategy.remove(workspace)).await {
        Ok(Ok(())) => {
            debug!(run_id = %workspace.run_id(), "workspace removed");
        }
        Ok(Err(e)) => {
            warn!(run_id = %workspace.run_id(), error = %e, "workspace cleanup failed");
        }
        Err(_) => {
            warn!(
                run_id = %workspace.run_id(),
                timeout_ms = timeout.as_millis() as u64,
                "workspace cleanup timed out"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceRoot;

    struct FailingCleanup;

    #[async_trait]
    impl CleanupStrategy for FailingCleanup {
        async fn remove(&self, _workspace: &Workspace) -> Result<()> {
            anyhow::bail!("simulated failure")
        }
    }

    struct HangingCleanup;

    #[async_trait]
    impl CleanupStrategy for HangingCleanup {
        async fn remove(&self, _workspace: &Workspace) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_direct_cleanup_removes_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(tmp.path());
        let ws = root.create_workspace().await.unwrap();
        ws.write_file("tests/deep/file.js", "x").await.unwrap();

        DirectCleanup.remove(&ws).await.unwrap();

        assert!(!ws.dir().exists());
        // Scratch root itself survives
        assert!(tmp.path().is_dir());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(tmp.path()).create_workspace().await.unwrap();

        // Must not panic or propagate
        cleanup_workspace(&FailingCleanup, &ws, Duration::from_millis(100)).await;
        assert!(ws.dir().exists());
    }

    #[tokio::test]
    async fn test_cleanup_timeout_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(tmp.path()).create_workspace().await.unwrap();

        let started = std::time::Instant::now();
        cleanup_workspace(&HangingCleanup, &ws, Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
