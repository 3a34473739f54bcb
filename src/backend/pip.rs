//! `pip install` into the request's virtual environment.

use std::ffi::OsStr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{run_captured, DependencyInstaller, IsolatedEnvironment};
use crate::error::{ExecError, Result};

/// Arguments placed before the package list.
const INSTALL_ARGS: [&str; 3] = ["install", "--disable-pip-version-check", "--no-input"];

/// Installs packages with the environment's own `pip`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    timeout: Duration,
}

impl PipInstaller {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DependencyInstaller for PipInstaller {
    #[instrument(skip(self, env), fields(root = %env.root().display()))]
    async fn install(&self, env: &IsolatedEnvironment, dependencies: &[String]) -> Result<()> {
        if dependencies.is_empty() {
            debug!("No dependencies declared");
            return Ok(());
        }

        let mut args: Vec<&OsStr> = INSTALL_ARGS.into_iter().map(OsStr::new).collect();
        args.extend(dependencies.iter().map(OsStr::new));

        let output = run_captured(env.package_manager(), args, self.timeout).await?;

        if output.timed_out {
            let mut stderr = format!("pip timed out after {}s", self.timeout.as_secs());
            if !output.stderr.is_empty() {
                stderr.push('\n');
                stderr.push_str(&output.stderr);
            }
            return Err(ExecError::DependencyInstall { stderr });
        }

        if !output.success() {
            return Err(ExecError::DependencyInstall {
                stderr: output.stderr,
            });
        }

        info!(count = dependencies.len(), "Dependencies installed");
        Ok(())
    }
}
