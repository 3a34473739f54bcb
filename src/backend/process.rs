//! Child process execution with captured output and a wall-clock bound.
//!
//! Shared by every stage that shells out: venv creation, `pip install` and
//! the script run itself.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use super::ScriptRunner;
use crate::error::{ExecError, Result};
use crate::outcome::ExecutionOutcome;

/// Captured result of a finished (or killed) child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code of the process (0 = success, -1 = killed by a signal).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// The process hit its timeout and was killed. Output is partial.
    pub timed_out: bool,
}

impl ProcessOutput {
    pub const fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Kills the child's whole process group, including anything it forked.
///
/// Armed from spawn until the group has been killed once; dropping it while
/// armed (future cancelled) kills the group too.
struct ProcessGroup {
    #[cfg(unix)]
    pgid: Option<Pid>,
}

impl ProcessGroup {
    #[cfg(unix)]
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader
                .and_then(|id| i32::try_from(id).ok())
                .map(Pid::from_raw),
        }
    }

    #[cfg(not(unix))]
    const fn new(_leader: Option<u32>) -> Self {
        Self {}
    }

    /// SIGKILL every member. A group that is already gone is not an error.
    #[cfg(unix)]
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill process group"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Spawn `program` with `args`, capture stdout and stderr, and wait for exit.
///
/// The child inherits the working directory and environment and runs in its
/// own process group. When the child exits, times out, or the returned future
/// is dropped, the whole group is killed, so background processes the child
/// started do not outlive it. Success is decided by the child's exit status.
#[instrument(skip_all, fields(program = %program.display(), timeout_secs = timeout.as_secs()))]
pub async fn run_captured<I, S>(program: &Path, args: I, timeout: Duration) -> Result<ProcessOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.display().to_string();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: name.clone(),
        source,
    })?;
    let mut group = ProcessGroup::new(child.id());

    let io_err = |source: std::io::Error| ExecError::Io {
        program: name.clone(),
        source,
    };
    let missing_pipe = || std::io::Error::other("child pipe not captured");

    let mut child_stdout = child.stdout.take().ok_or_else(missing_pipe).map_err(io_err)?;
    let mut child_stderr = child.stderr.take().ok_or_else(missing_pipe).map_err(io_err)?;

    // Buffers live outside the future so partial output survives a timeout
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let run = async {
        tokio::join!(
            child_stdout.read_to_end(&mut stdout_buf),
            child_stderr.read_to_end(&mut stderr_buf),
            async {
                let status = child.wait().await;
                // Leftover background processes would hold the pipes open
                group.kill();
                status
            },
        )
    };
    let finished = tokio::time::timeout(timeout, run).await;

    let (exit_code, timed_out) = match finished {
        Ok((r1, r2, status)) => {
            let status = status.map_err(io_err)?;
            r1.and(r2).map_err(io_err)?;
            (status.code().unwrap_or(-1), false)
        }
        Err(_) => {
            warn!("Process timed out, killing process group");
            group.kill();
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed out process");
            }
            (-1, true)
        }
    };

    let output = ProcessOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        timed_out,
    };

    debug!(
        exit_code = output.exit_code,
        timed_out,
        stdout_len = output.stdout.len(),
        stderr_len = output.stderr.len(),
        "Process finished"
    );

    Ok(output)
}

/// Runs a script with the environment's interpreter.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(&self, interpreter: &Path, script: &Path) -> ExecutionOutcome {
        match run_captured(interpreter, [script], self.timeout).await {
            Ok(output) if output.timed_out => {
                let mut stderr = format!("Execution timed out after {}s", self.timeout.as_secs());
                if !output.stderr.is_empty() {
                    stderr.push('\n');
                    stderr.push_str(&output.stderr);
                }
                ExecutionOutcome::RuntimeError { stderr }
            }
            Ok(output) if output.success() => ExecutionOutcome::Success {
                stdout: output.stdout,
            },
            Ok(output) => ExecutionOutcome::RuntimeError {
                stderr: output.stderr,
            },
            Err(e) => e.into(),
        }
    }
}
