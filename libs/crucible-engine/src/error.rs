//! Error taxonomy for the engine.
//!
//! `EngineError` is the single error type returned across the engine's
//! internal seams. Sentinel outcomes (timeout, test failure, missing
//! coverage, cleanup failure) are carried inside `ExecutionResult`, not
//! here; this type covers only the failures that abort a run before a
//! result can be produced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested language has no sandbox configuration.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Workspace allocation or file materialization failed.
    #[error("workspace I/O error: {0}")]
    WorkspaceIo(#[from] std::io::Error),

    /// The sandbox (Docker daemon, image pull, container lifecycle) could
    /// not be brought up.
    #[error("sandbox spawn error: {0}")]
    SandboxSpawn(String),
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        EngineError::SandboxSpawn(err.to_string())
    }
}
