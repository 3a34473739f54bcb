//! Process-level components of the execution pipeline.
//!
//! Each stage sits behind a trait so the orchestrator can be driven without
//! touching a real interpreter. The default implementations create a Python
//! virtual environment per request, install with its `pip`, and run the script
//! with its interpreter.

mod pip;
mod process;
mod venv;

pub use pip::PipInstaller;
pub use process::{run_captured, ProcessOutput, ProcessRunner};
pub use venv::VenvProvisioner;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{ExecError, Result};
use crate::outcome::ExecutionOutcome;

/// Directory name of the virtual environment inside the workspace.
const VENV_DIR: &str = "venv";

/// File name of the materialized script inside the workspace.
const SCRIPT_FILE: &str = "code.py";

/// A throwaway runtime owned by a single execution.
///
/// The workspace directory is removed when this value is dropped, so an
/// environment that is never explicitly destroyed still leaves nothing behind.
#[derive(Debug)]
pub struct IsolatedEnvironment {
    workspace: TempDir,
    interpreter: PathBuf,
    package_manager: PathBuf,
}

impl IsolatedEnvironment {
    /// Wrap a freshly created workspace. Interpreter and package manager
    /// paths are derived from it; nothing is created on disk here.
    pub fn new(workspace: TempDir) -> Self {
        let venv = workspace.path().join(VENV_DIR);
        let bin = if cfg!(windows) {
            venv.join("Scripts")
        } else {
            venv.join("bin")
        };
        let exe = std::env::consts::EXE_SUFFIX;
        Self {
            interpreter: bin.join(format!("python{exe}")),
            package_manager: bin.join(format!("pip{exe}")),
            workspace,
        }
    }

    pub fn root(&self) -> &Path {
        self.workspace.path()
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root().join(VENV_DIR)
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn package_manager(&self) -> &Path {
        &self.package_manager
    }

    pub fn script_path(&self) -> PathBuf {
        self.root().join(SCRIPT_FILE)
    }

    /// Remove the workspace tree. Consumes the environment either way.
    pub fn remove(self) -> Result<()> {
        let path = self.root().to_path_buf();
        self.workspace
            .close()
            .map_err(|source| ExecError::Teardown { path, source })
    }
}

/// Creates and destroys isolated environments.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a fresh environment. A partially created workspace is removed
    /// before an error is returned.
    async fn create(&self) -> Result<IsolatedEnvironment>;

    /// Tear the environment down. Called exactly once per created environment.
    async fn destroy(&self, env: IsolatedEnvironment) -> Result<()>;
}

/// Installs declared packages into an environment.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Install every package in a single package-manager invocation.
    ///
    /// `Ok(())` means all were installed. A non-zero exit is
    /// [`ExecError::DependencyInstall`] carrying the raw stderr, even if empty.
    async fn install(&self, env: &IsolatedEnvironment, dependencies: &[String]) -> Result<()>;
}

/// Runs a materialized script and classifies the result.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, interpreter: &Path, script: &Path) -> ExecutionOutcome;
}
