//! Sequences one execution request end to end.
//!
//! validate → provision → install → materialize → run → teardown
//!
//! Teardown runs on every path that created an environment. Nothing below
//! this module escapes as an error; every failure becomes an
//! [`ExecutionOutcome`].

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::backend::{
    DependencyInstaller, IsolatedEnvironment, PipInstaller, ProcessRunner, Provisioner,
    ScriptRunner, VenvProvisioner,
};
use crate::config::Config;
use crate::materialize;
use crate::outcome::{ExecutionOutcome, Rejection};

/// The only runtime this service executes.
pub const SUPPORTED_LANGUAGE: &str = "python";

pub const MSG_PROVISIONING: &str = "Creating virtual environment";
pub const MSG_INSTALLING: &str = "Installing dependencies";
pub const MSG_EXECUTING: &str = "Executing code";

/// One execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Submitted text, possibly wrapped in a ```` ```python ```` fence.
    pub code: String,
    /// Must equal [`SUPPORTED_LANGUAGE`], ignoring ASCII case.
    pub code_language: String,
    /// Packages to install before running, in order.
    pub dependencies: Vec<String>,
}

impl ExecutionRequest {
    pub fn python(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            code_language: SUPPORTED_LANGUAGE.to_string(),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Check the request before any resource is allocated.
    pub fn validate(&self) -> Result<(), Rejection> {
        if self.code.trim().is_empty() {
            return Err(Rejection::EmptyCode);
        }
        if !self.code_language.eq_ignore_ascii_case(SUPPORTED_LANGUAGE) {
            return Err(Rejection::UnsupportedLanguage);
        }
        // pip would read these as options (`--index-url`, `-r file`)
        if self.dependencies.iter().any(|d| d.trim_start().starts_with('-')) {
            return Err(Rejection::InvalidDependency);
        }
        Ok(())
    }
}

/// Receives progress messages. Fire and forget.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message);
    }
}

/// Logs progress at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn notify(&self, message: &str) {
        info!(progress = %message);
    }
}

/// Runs requests through the provisioner, installer and runner.
///
/// Holds no per-request state; concurrent `execute` calls are independent.
#[derive(Clone)]
pub struct Orchestrator {
    provisioner: Arc<dyn Provisioner>,
    installer: Arc<dyn DependencyInstaller>,
    runner: Arc<dyn ScriptRunner>,
}

impl Orchestrator {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        installer: Arc<dyn DependencyInstaller>,
        runner: Arc<dyn ScriptRunner>,
    ) -> Self {
        Self {
            provisioner,
            installer,
            runner,
        }
    }

    /// Default stack: venv per request, `pip`, and the venv interpreter.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(VenvProvisioner::from_config(config)),
            Arc::new(PipInstaller::new(config.install_timeout())),
            Arc::new(ProcessRunner::new(config.timeout())),
        )
    }

    /// Execute one request. Always returns an outcome.
    ///
    /// Dropping the returned future kills any running child and removes the
    /// workspace.
    #[instrument(
        skip_all,
        fields(code_len = request.code.len(), deps = request.dependencies.len())
    )]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: &dyn ProgressSink,
    ) -> ExecutionOutcome {
        if let Err(rejection) = request.validate() {
            info!(reason = ?rejection, "Request rejected");
            return ExecutionOutcome::Rejected(rejection);
        }

        progress.notify(MSG_PROVISIONING);
        let env = match self.provisioner.create().await {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "Provisioning failed");
                return e.into();
            }
        };

        let outcome = self.run_in(&env, request, progress).await;

        let root = env.root().to_path_buf();
        if let Err(e) = self.provisioner.destroy(env).await {
            warn!(root = %root.display(), error = %e, "Teardown failed");
        }

        info!(success = outcome.is_success(), "Execution finished");
        outcome
    }

    /// Steps that need a live environment.
    async fn run_in(
        &self,
        env: &IsolatedEnvironment,
        request: &ExecutionRequest,
        progress: &dyn ProgressSink,
    ) -> ExecutionOutcome {
        if !request.dependencies.is_empty() {
            progress.notify(MSG_INSTALLING);
            if let Err(e) = self.installer.install(env, &request.dependencies).await {
                return e.into();
            }
        }

        let script = env.script_path();
        if let Err(e) = materialize::extract_and_write(&request.code, &script).await {
            return e.into();
        }

        progress.notify(MSG_EXECUTING);
        self.runner.run(env.interpreter(), &script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{ExecError, Result};

    #[derive(Default)]
    struct FakeProvisioner {
        fail: bool,
        created: AtomicUsize,
        destroyed: AtomicUsize,
        roots: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn create(&self) -> Result<IsolatedEnvironment> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExecError::Provisioning {
                    python: "python3".to_string(),
                    detail: "No module named venv".to_string(),
                });
            }
            let env = IsolatedEnvironment::new(tempfile::tempdir().unwrap());
            self.roots.lock().unwrap().push(env.root().to_path_buf());
            Ok(env)
        }

        async fn destroy(&self, env: IsolatedEnvironment) -> Result<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            env.remove()
        }
    }

    #[derive(Default)]
    struct FakeInstaller {
        stderr: Option<String>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl DependencyInstaller for FakeInstaller {
        async fn install(&self, _env: &IsolatedEnvironment, dependencies: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(dependencies.to_vec());
            match &self.stderr {
                Some(stderr) => Err(ExecError::DependencyInstall {
                    stderr: stderr.clone(),
                }),
                None => Ok(()),
            }
        }
    }

    /// Records the script it was handed and replies with a fixed outcome.
    struct FakeRunner {
        outcome: ExecutionOutcome,
        calls: AtomicUsize,
        script: Mutex<Option<String>>,
    }

    impl FakeRunner {
        fn replying(outcome: ExecutionOutcome) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
                script: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ScriptRunner for FakeRunner {
        async fn run(&self, _interpreter: &Path, script: &Path) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.script.lock().unwrap() = std::fs::read_to_string(script).ok();
            self.outcome.clone()
        }
    }

    struct Harness {
        provisioner: Arc<FakeProvisioner>,
        installer: Arc<FakeInstaller>,
        runner: Arc<FakeRunner>,
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(provisioner: FakeProvisioner, installer: FakeInstaller, runner: FakeRunner) -> Self {
            Self {
                provisioner: Arc::new(provisioner),
                installer: Arc::new(installer),
                runner: Arc::new(runner),
                messages: Arc::default(),
            }
        }

        fn ok() -> Self {
            Self::new(
                FakeProvisioner::default(),
                FakeInstaller::default(),
                FakeRunner::replying(ExecutionOutcome::Success {
                    stdout: "hi\n".to_string(),
                }),
            )
        }

        async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
            let orchestrator = Orchestrator::new(
                self.provisioner.clone(),
                self.installer.clone(),
                self.runner.clone(),
            );
            let messages = Arc::clone(&self.messages);
            let sink = move |m: &str| messages.lock().unwrap().push(m.to_string());
            orchestrator.execute(request, &sink).await
        }

        fn created(&self) -> usize {
            self.provisioner.created.load(Ordering::SeqCst)
        }

        fn destroyed(&self) -> usize {
            self.provisioner.destroyed.load(Ordering::SeqCst)
        }

        fn runs(&self) -> usize {
            self.runner.calls.load(Ordering::SeqCst)
        }

        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        fn roots_removed(&self) -> bool {
            self.provisioner
                .roots
                .lock()
                .unwrap()
                .iter()
                .all(|root| !root.exists())
        }
    }

    #[tokio::test]
    async fn empty_code_never_provisions() {
        let h = Harness::ok();

        for code in ["", "   \n\t"] {
            let outcome = h.execute(&ExecutionRequest::python(code)).await;
            assert_eq!(outcome, ExecutionOutcome::Rejected(Rejection::EmptyCode));
        }

        assert_eq!(h.created(), 0);
        assert!(h.messages().is_empty());
    }

    #[tokio::test]
    async fn unsupported_language_never_provisions() {
        let h = Harness::ok();
        let request = ExecutionRequest {
            code: "console.log(1)".to_string(),
            code_language: "javascript".to_string(),
            dependencies: Vec::new(),
        };

        let outcome = h.execute(&request).await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Rejected(Rejection::UnsupportedLanguage)
        );
        assert_eq!(h.created(), 0);
    }

    #[tokio::test]
    async fn language_match_ignores_case() {
        let h = Harness::ok();
        let mut request = ExecutionRequest::python("print('hi')");
        request.code_language = "PyThOn".to_string();

        assert!(h.execute(&request).await.is_success());
        assert_eq!(h.created(), 1);
    }

    #[tokio::test]
    async fn success_runs_every_step_once() {
        let h = Harness::ok();
        let request = ExecutionRequest::python("```python\nprint('hi')\n```")
            .with_dependencies(["numpy", "pandas"]);

        let outcome = h.execute(&request).await;

        assert!(outcome.is_success());
        assert!(outcome.payload().contains("hi"));
        assert_eq!(h.created(), 1);
        assert_eq!(h.destroyed(), 1);
        assert_eq!(h.runs(), 1);
        assert!(h.roots_removed());
        assert_eq!(
            *h.installer.calls.lock().unwrap(),
            vec![vec!["numpy".to_string(), "pandas".to_string()]]
        );
        assert_eq!(
            h.runner.script.lock().unwrap().as_deref(),
            Some("print('hi')")
        );
        assert_eq!(
            h.messages(),
            vec![MSG_PROVISIONING, MSG_INSTALLING, MSG_EXECUTING]
        );
    }

    #[tokio::test]
    async fn no_dependencies_skips_installer() {
        let h = Harness::ok();

        h.execute(&ExecutionRequest::python("print(1)")).await;

        assert!(h.installer.calls.lock().unwrap().is_empty());
        assert_eq!(h.messages(), vec![MSG_PROVISIONING, MSG_EXECUTING]);
    }

    #[tokio::test]
    async fn install_failure_stops_before_run() {
        let h = Harness::new(
            FakeProvisioner::default(),
            FakeInstaller {
                stderr: Some("ERR".to_string()),
                ..FakeInstaller::default()
            },
            FakeRunner::replying(ExecutionOutcome::Success {
                stdout: String::new(),
            }),
        );
        let request = ExecutionRequest::python("import numpy").with_dependencies(["numpy"]);

        let outcome = h.execute(&request).await;

        match &outcome {
            ExecutionOutcome::DependencyInstallError { stderr } => assert!(stderr.contains("ERR")),
            other => panic!("expected install error, got {other:?}"),
        }
        assert!(outcome
            .to_string()
            .starts_with("Error installing dependencies:\n```\n"));
        assert_eq!(h.runs(), 0);
        assert_eq!(h.destroyed(), 1);
        assert!(h.roots_removed());
    }

    #[tokio::test]
    async fn empty_install_stderr_is_still_failure() {
        let h = Harness::new(
            FakeProvisioner::default(),
            FakeInstaller {
                stderr: Some(String::new()),
                ..FakeInstaller::default()
            },
            FakeRunner::replying(ExecutionOutcome::Success {
                stdout: String::new(),
            }),
        );
        let request = ExecutionRequest::python("print(1)").with_dependencies(["numpy"]);

        let outcome = h.execute(&request).await;

        assert_eq!(
            outcome,
            ExecutionOutcome::DependencyInstallError {
                stderr: String::new()
            }
        );
        assert_eq!(h.runs(), 0);
    }

    #[tokio::test]
    async fn runtime_error_still_tears_down() {
        let h = Harness::new(
            FakeProvisioner::default(),
            FakeInstaller::default(),
            FakeRunner::replying(ExecutionOutcome::RuntimeError {
                stderr: "boom".to_string(),
            }),
        );

        let outcome = h.execute(&ExecutionRequest::python("raise SystemExit(1)")).await;

        assert!(outcome.to_string().contains("boom"));
        assert_eq!(h.destroyed(), 1);
        assert!(h.roots_removed());
    }

    #[tokio::test]
    async fn provisioning_failure_is_unexpected_error() {
        let h = Harness::new(
            FakeProvisioner {
                fail: true,
                ..FakeProvisioner::default()
            },
            FakeInstaller::default(),
            FakeRunner::replying(ExecutionOutcome::Success {
                stdout: String::new(),
            }),
        );

        let outcome = h.execute(&ExecutionRequest::python("print(1)")).await;

        assert!(matches!(outcome, ExecutionOutcome::UnexpectedError { .. }));
        assert!(outcome.payload().contains("No module named venv"));
        assert_eq!(h.created(), 1);
        assert_eq!(h.destroyed(), 0);
        assert_eq!(h.runs(), 0);
        assert_eq!(h.messages(), vec![MSG_PROVISIONING]);
    }

    #[tokio::test]
    async fn dangling_fence_runs_verbatim() {
        let h = Harness::ok();

        h.execute(&ExecutionRequest::python("```python\nprint(1)")).await;

        assert_eq!(
            h.runner.script.lock().unwrap().as_deref(),
            Some("```python\nprint(1)")
        );
    }

    #[tokio::test]
    async fn no_op_sink_does_not_change_result() {
        let orchestrator = Orchestrator::new(
            Arc::new(FakeProvisioner::default()),
            Arc::new(FakeInstaller::default()),
            Arc::new(FakeRunner::replying(ExecutionOutcome::Success {
                stdout: "hi".to_string(),
            })),
        );

        let outcome = orchestrator
            .execute(&ExecutionRequest::python("print('hi')"), &|_: &str| {})
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                stdout: "hi".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn default_stack_with_missing_python() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            python: "/nonexistent/python3".to_string(),
            workspace_root: Some(root.path().to_path_buf()),
            ..Config::default()
        };

        let outcome = Orchestrator::from_config(&config)
            .execute(&ExecutionRequest::python("print(1)"), &TracingSink)
            .await;

        assert!(outcome.to_string().starts_with("Error executing code:\n```\n"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn option_like_dependencies_never_provision() {
        let h = Harness::ok();

        for dep in ["--index-url=https://mirror.example/simple", "-r", " -e ."] {
            let request = ExecutionRequest::python("print(1)").with_dependencies(["numpy", dep]);
            let outcome = h.execute(&request).await;
            assert_eq!(
                outcome,
                ExecutionOutcome::Rejected(Rejection::InvalidDependency)
            );
        }

        assert_eq!(h.created(), 0);
        assert!(h.installer.calls.lock().unwrap().is_empty());
    }

    /// Never finishes; stands in for a script that is still running.
    struct HangingRunner;

    #[async_trait]
    impl ScriptRunner for HangingRunner {
        async fn run(&self, _interpreter: &Path, _script: &Path) -> ExecutionOutcome {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn dropping_execute_removes_workspace() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let orchestrator = Orchestrator::new(
            provisioner.clone(),
            Arc::new(FakeInstaller::default()),
            Arc::new(HangingRunner),
        );

        let request = ExecutionRequest::python("while True: pass");
        let run = orchestrator.execute(&request, &TracingSink);
        let cancelled = tokio::time::timeout(Duration::from_millis(200), run).await;

        assert!(cancelled.is_err());
        let roots = provisioner.roots.lock().unwrap().clone();
        assert_eq!(roots.len(), 1);
        assert!(!roots[0].exists());
    }
}
