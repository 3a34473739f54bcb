//! Execution outcomes and their display text.
//!
//! Payloads are rendered as a labelled fenced block so callers can drop the
//! text straight into a markdown message.

use std::fmt;

use crate::error::ExecError;

/// Why a request was refused before any environment was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyCode,
    UnsupportedLanguage,
    /// A dependency looks like a package-manager option.
    InvalidDependency,
}

impl Rejection {
    pub const fn message(self) -> &'static str {
        match self {
            Self::EmptyCode => "The code is empty. Please write a valid python code.",
            Self::UnsupportedLanguage => {
                "Only Python code is supported. Please write a valid python code."
            }
            Self::InvalidDependency => {
                "Dependencies must be package names. Options starting with '-' are not allowed."
            }
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of one execution request. Exactly one variant per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Script exited 0.
    Success { stdout: String },
    /// The package manager failed; the script never ran.
    DependencyInstallError { stderr: String },
    /// Script exited non-zero (or was killed on timeout).
    RuntimeError { stderr: String },
    /// Provisioning, spawn or I/O failure.
    UnexpectedError { message: String },
    /// Refused during validation. Not fenced.
    Rejected(Rejection),
}

impl ExecutionOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Label placed above the fenced payload.
    pub const fn label(&self) -> Option<&'static str> {
        match self {
            Self::Success { .. } => Some("Output"),
            Self::DependencyInstallError { .. } => Some("Error installing dependencies"),
            Self::RuntimeError { .. } => Some("Execution error"),
            Self::UnexpectedError { .. } => Some("Error executing code"),
            Self::Rejected(_) => None,
        }
    }

    /// Raw captured text, before fencing.
    pub fn payload(&self) -> &str {
        match self {
            Self::Success { stdout } => stdout,
            Self::DependencyInstallError { stderr } | Self::RuntimeError { stderr } => stderr,
            Self::UnexpectedError { message } => message,
            Self::Rejected(rejection) => rejection.message(),
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{label}:\n```\n{}\n```", self.payload()),
            None => f.write_str(self.payload()),
        }
    }
}

impl From<ExecError> for ExecutionOutcome {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::DependencyInstall { stderr } => Self::DependencyInstallError { stderr },
            other => Self::UnexpectedError {
                message: other.to_string(),
            },
        }
    }
}
