//! Crucible execution engine.
//!
//! Accepts an untrusted `(language, source, test)` triple, runs the test
//! suite inside a resource-bounded, network-denied container, and returns
//! one structured [`ExecutionResult`].
//!
//! Pipeline per request: allocate workspace → materialize files → run
//! sandbox → parse output + extract coverage → reclaim workspace
//! (unconditionally) → result. Requests are independent workers with no
//! shared mutable state beyond the scratch root path and an in-flight
//! counter; uniqueness of run identifiers is the only concurrency-safety
//! mechanism.

pub mod adapter;
pub mod cleanup;
pub mod config;
pub mod coverage;
pub mod error;
pub mod mocks;
pub mod parser;
pub mod sandbox;
pub mod workspace;


pub use crate::config::SandboxConfigManager;
pub use crate::error::EngineError;
pub use crate::sandbox::{CancelHandle, CANCELLED_EXIT_CODE, TIMEOUT_EXIT_CODE};
pub use crate::workspace::WorkspaceRoot;
pub use crucible_common::{ExecutionRequest, ExecutionResult, Language, ReportDetails};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, info};

use crate::cleanup::CleanupStrategy;
use crate::config::LanguageSandbox;
use crate::sandbox::SandboxRunner;
use crate::workspace::Workspace;

/// Safety limit to keep pathological inputs away from the sandbox
const MAX_CODE_BYTES: usize = 1024 * 1024; // 1MB

/// The execution engine. One instance serves many concurrent requests.
pub struct Engine {
    runner: SandboxRunner,
    config: SandboxConfigManager,
    root: WorkspaceRoot,
    cleanup: Box<dyn CleanupStrategy>,
    cleanup_timeout: Duration,
    in_flight: AtomicUsize,
}

impl Engine {
    pub fn new(config: SandboxConfigManager, root: WorkspaceRoot) -> Result<Self, EngineError> {
        let runner = SandboxRunner::new()?;
        let cleanup = cleanup::strategy_from_config(runner.docker(), config.cleanup());
        let cleanup_timeout = Duration::from_millis(config.cleanup().timeout_ms);

        Ok(Engine {
            runner,
            config,
            root,
            cleanup,
            cleanup_timeout,
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Number of requests currently executing. Useful for admission
    /// control in the calling layer; not needed for correctness.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Execute a request to completion. Total: every outcome, including
    /// engine-side failures, arrives as a structured result.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute_cancellable(request, &CancelHandle::new()).await
    }

    /// Execute with an explicit cancel handle. Cancelling forcibly
    /// terminates the sandboxed child and proceeds directly to cleanup.
    #[tracing::instrument(skip(self, request, cancel), fields(language = %request.language))]
    pub async fn execute_cancellable(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelHandle,
    ) -> ExecutionResult {
        let _in_flight = InFlightGuard::enter(&self.in_flight);

        if request.source_code.len() > MAX_CODE_BYTES || request.test_code.len() > MAX_CODE_BYTES {
            return ExecutionResult::rejected(format!(
                "Input exceeds maximum size of {} bytes",
                MAX_CODE_BYTES
            ));
        }

        let sandbox_config = match self.config.get_config(&request.language) {
            Ok(config) => config.clone(),
            Err(_) => {
                let err = EngineError::UnsupportedLanguage(request.language.to_string());
                return ExecutionResult::rejected(err.to_string());
            }
        };

        let workspace = match self.root.create_workspace().await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "failed to allocate workspace");
                return ExecutionResult::rejected(e.to_string());
            }
        };

        info!(
            run_id = %workspace.run_id(),
            language = %request.language,
            source_size = request.source_code.len(),
            test_size = request.test_code.len(),
            "execution started"
        );

        let result = self
            .run_in_workspace(&workspace, request, &sandbox_config, cancel)
            .await;

        // Reclaim the workspace on every path; the result is already decided.
        cleanup::cleanup_workspace(self.cleanup.as_ref(), &workspace, self.cleanup_timeout).await;

        match result {
            Ok(result) => {
                info!(
                    run_id = %workspace.run_id(),
                    exit_code = result.exit_code,
                    passed = result.passed,
                    total = result.details.total,
                    coverage = result.details.coverage,
                    "execution finished"
                );
                result
            }
            Err(e) => {
                error!(run_id = %workspace.run_id(), error = %e, "execution failed");
                ExecutionResult::rejected(e.to_string())
            }
        }
    }

    async fn run_in_workspace(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        sandbox_config: &LanguageSandbox,
        cancel: &CancelHandle,
    ) -> Result<ExecutionResult, EngineError> {
        let command = adapter::materialize(workspace, request).await?;

        let raw = self
            .runner
            .run(workspace, sandbox_config, &command, cancel)
            .await?;

        let output = raw.combined_output();
        let mut details = parser::parse_output(request.language, &output);
        details.coverage = coverage::extract_coverage(request.language, workspace.dir()).await;

        Ok(ExecutionResult::completed(raw.exit_code, output, details))
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
