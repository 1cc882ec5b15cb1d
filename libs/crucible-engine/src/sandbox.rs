//! Sandboxed execution of a prepared workspace.
//!
//! Every run gets a fresh container: workspace bind-mounted read-write at
//! /app, network disabled, memory and CPU capped from the language config.
//! The wall-clock limit is enforced here, by the calling process,
//! independent of anything the container itself might do — a stuck or
//! infinite-looping generated test must never block the caller.
//!
//! A non-zero exit from the container is a normal outcome (the test suite
//! failed); only daemon, spawn, and IO failures are runner errors.

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::LanguageSandbox;
use crate::error::EngineError;
use crate::workspace::Workspace;

/// Exit code reported when the wall-clock limit fires (coreutils timeout
/// convention).
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Exit code reported when the caller cancels an in-flight run.
pub const CANCELLED_EXIT_CODE: i64 = 130;

/// Explicit cancel handle for an in-flight execution.
///
/// Deadline and cancellation are two triggers of the same bounded-execution
/// primitive: the runner selects over completion, the deadline sleep, and
/// this handle, and the losing futures are dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called, including calls that happened
    /// before this future was created.
    pub async fn cancelled(&self) {
        loop {
            // Register for wakeups before checking the flag; a cancel that
            // lands between the check and the await would otherwise be lost.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Raw captured output of one sandboxed run.
#[derive(Debug, Clone)]
pub struct RawRunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub cancelled: bool,
    pub execution_time_ms: u64,
}

impl RawRunOutput {
    /// Stdout plus labeled stderr, the shape the caller receives.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\nErrors:\n{}", self.stdout, self.stderr)
        }
    }
}

/// Container cleanup guard - guarantees container removal on drop, even if
/// the surrounding future panics or is cancelled mid-run.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let docker = self.docker.clone();
        let container_id = self.container_id.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "failed to remove container");
            }
        });
    }
}

/// Ensure a Docker image is available locally, pulling on cache miss.
pub(crate) async fn ensure_image(
    docker: &Docker,
    image: &str,
) -> Result<(), bollard::errors::Error> {
    if docker.inspect_image(image).await.is_ok() {
        debug!(image = %image, "image cache hit");
        return Ok(());
    }

    warn!(image = %image, "image cache miss, pulling");

    let options = Some(CreateImageOptions {
        from_image: image,
        ..Default::default()
    });

    let mut stream = docker.create_image(options, None, None);
    while let Some(result) = stream.next().await {
        result?;
    }

    info!(image = %image, "image pulled");
    Ok(())
}

/// Docker-backed isolation runner.
pub struct SandboxRunner {
    docker: Docker,
}

impl SandboxRunner {
    pub fn new() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(SandboxRunner { docker })
    }

    pub fn with_docker(docker: Docker) -> Self {
        SandboxRunner { docker }
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Run the prepared command against a workspace under the language's
    /// resource limits. Returns the sentinel outputs for deadline and
    /// cancellation; `Err` means the sandbox could not be run at all.
    pub async fn run(
        &self,
        workspace: &Workspace,
        sandbox: &LanguageSandbox,
        command: &[String],
        cancel: &CancelHandle,
    ) -> Result<RawRunOutput, EngineError> {
        ensure_image(&self.docker, &sandbox.image).await?;

        let container_name = format!("crucible-{}", workspace.run_id());
        let memory_bytes = i64::from(sandbox.memory_limit_mb) * 1024 * 1024;
        let nano_cpus = (f64::from(sandbox.cpu_limit) * 1_000_000_000.0) as i64;

        let config = Config {
            image: Some(sandbox.image.clone()),
            cmd: Some(command.to_vec()),
            working_dir: Some("/app".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory_bytes),
                nano_cpus: Some(nano_cpus),
                binds: Some(vec![format!("{}:/app", workspace.dir().display())]),
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
        let container_id = container.id.clone();

        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container_id.clone(),
        };

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        let execution_future = async {
            let mut stdout = String::new();
            let mut stderr = String::new();

            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => {
                        warn!(container_id = %container_id, error = %e, "error reading container logs");
                        break;
                    }
                    _ => {}
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait_stream = self.docker.wait_container(&container_id, Some(wait_options));
            let exit_code = match wait_stream.next().await {
                Some(Ok(response)) => Some(response.status_code),
                Some(Err(e)) => {
                    warn!(container_id = %container_id, error = %e, "failed to get container exit code");
                    None
                }
                None => None,
            };

            (stdout, stderr, exit_code)
        };

        let deadline = Duration::from_millis(sandbox.wall_clock_ms);

        let output = tokio::select! {
            (stdout, mut stderr, exit_code) = execution_future => {
                let exit_code = match exit_code {
                    Some(code) => code,
                    None => {
                        stderr.push_str("\n[No exit status from sandbox]");
                        -1
                    }
                };

                if exit_code == 137 {
                    stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]");
                }

                RawRunOutput {
                    stdout,
                    stderr,
                    exit_code,
                    timed_out: false,
                    cancelled: false,
                    execution_time_ms: start_time.elapsed().as_millis() as u64,
                }
            }
            _ = tokio::time::sleep(deadline) => {
                warn!(
                    container_id = %container_id,
                    wall_clock_ms = sandbox.wall_clock_ms,
                    "execution exceeded wall-clock limit, killing container"
                );
                self.kill(&container_id).await;

                RawRunOutput {
                    stdout: String::new(),
                    stderr: format!("Execution timed out ({}s limit)", sandbox.wall_clock_ms / 1000),
                    exit_code: TIMEOUT_EXIT_CODE,
                    timed_out: true,
                    cancelled: false,
                    execution_time_ms: start_time.elapsed().as_millis() as u64,
                }
            }
            _ = cancel.cancelled() => {
                info!(container_id = %container_id, "execution cancelled, killing container");
                self.kill(&container_id).await;

                RawRunOutput {
                    stdout: String::new(),
                    stderr: "[Execution cancelled]".to_string(),
                    exit_code: CANCELLED_EXIT_CODE,
                    timed_out: false,
                    cancelled: true,
                    execution_time_ms: start_time.elapsed().as_millis() as u64,
                }
            }
        };

        debug!(
            container_id = %container_id,
            exit_code = output.exit_code,
            execution_time_ms = output.execution_time_ms,
            "sandbox run finished"
        );

        Ok(output)
    }

    async fn kill(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = %container_id, error = %e, "failed to kill container");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_before_wait_resolves_immediately() {
        let handle = CancelHandle::new();
        handle.cancel();

        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .expect("cancelled() should resolve for an already-cancelled handle");
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiting_task() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_uncancelled_handle_does_not_resolve() {
        let handle = CancelHandle::new();
        let result =
            tokio::time::timeout(Duration::from_millis(50), handle.cancelled()).await;
        assert!(result.is_err());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_combined_output_labels_stderr() {
        let output = RawRunOutput {
            stdout: "2 passed".to_string(),
            stderr: "warning: deprecated".to_string(),
            exit_code: 0,
            timed_out: false,
            cancelled: false,
            execution_time_ms: 10,
        };
        assert_eq!(output.combined_output(), "2 passed\nErrors:\nwarning: deprecated");

        let clean = RawRunOutput {
            stderr: String::new(),
            ..output
        };
        assert_eq!(clean.combined_output(), "2 passed");
    }
}
