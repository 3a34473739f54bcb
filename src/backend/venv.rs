//! Per-request Python virtual environments.
//!
//! Each environment is `<tmp>/venv-sandbox-XXXX/venv`, created with
//! `python -m venv` so `pip` is seeded and no bootstrap download is needed.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use super::{run_captured, IsolatedEnvironment, Provisioner};
use crate::config::Config;
use crate::error::{ExecError, Result};

const WORKSPACE_PREFIX: &str = "venv-sandbox-";

/// Creates a fresh virtual environment in a unique temporary directory.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    python: String,
    workspace_root: Option<PathBuf>,
    timeout: Duration,
}

impl VenvProvisioner {
    /// Provisioner using `python` as the base interpreter.
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            workspace_root: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            python: config.python.clone(),
            workspace_root: config.workspace_root.clone(),
            timeout: Duration::from_secs(config.provision_timeout_seconds),
        }
    }

    /// Create workspaces under `root` instead of the system temp directory.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    fn create_workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let workspace = match &self.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        workspace.map_err(ExecError::Workspace)
    }
}

#[async_trait]
impl Provisioner for VenvProvisioner {
    #[instrument(skip(self), fields(python = %self.python))]
    async fn create(&self) -> Result<IsolatedEnvironment> {
        // Dropping `env` on any early return removes the partial workspace.
        let env = IsolatedEnvironment::new(self.create_workspace()?);
        let venv_dir = env.venv_dir();
        debug!(path = %venv_dir.display(), "Creating virtual environment");

        let output = run_captured(
            Path::new(&self.python),
            [OsStr::new("-m"), OsStr::new("venv"), venv_dir.as_os_str()],
            self.timeout,
        )
        .await?;

        if output.timed_out {
            return Err(ExecError::Timeout {
                program: format!("{} -m venv", self.python),
                timeout: self.timeout,
            });
        }

        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                output.stderr.trim().to_string()
            };
            return Err(ExecError::Provisioning {
                python: self.python.clone(),
                detail,
            });
        }

        info!(root = %env.root().display(), "Virtual environment ready");
        Ok(env)
    }

    async fn destroy(&self, env: IsolatedEnvironment) -> Result<()> {
        let root = env.root().to_path_buf();
        debug!(root = %root.display(), "Removing environment");

        // A venv is thousands of files; keep the removal off the async workers.
        tokio::task::spawn_blocking(move || env.remove())
            .await
            .map_err(|e| ExecError::Teardown {
                path: root,
                source: std::io::Error::other(e),
            })?
    }
}
