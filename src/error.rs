//! Error taxonomy for the execution pipeline.
//!
//! Every variant is converted into an [`ExecutionOutcome`] at the
//! orchestrator boundary; none of them reach the caller as a `Result`.
//!
//! [`ExecutionOutcome`]: crate::outcome::ExecutionOutcome

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised below the orchestrator.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The per-request temporary directory could not be created.
    #[error("Failed to create workspace directory: {0}")]
    Workspace(#[source] std::io::Error),

    /// The virtual environment could not be created inside the workspace.
    #[error("Failed to create virtual environment with '{python}': {detail}")]
    Provisioning { python: String, detail: String },

    /// The package manager exited non-zero. Carries its stderr verbatim.
    #[error("Dependency installation failed")]
    DependencyInstall { stderr: String },

    /// A child process could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or waiting on a running child failed.
    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The script artifact could not be written.
    #[error("Failed to write script to {}: {source}", path.display())]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A child exceeded its wall-clock budget and was killed.
    #[error("'{program}' timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    /// Removing the workspace failed. The environment is discarded regardless.
    #[error("Failed to remove environment at {}: {source}", path.display())]
    Teardown {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ExecError>;
