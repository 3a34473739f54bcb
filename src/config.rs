//! Service configuration.
//!
//! Loaded once at startup and passed explicitly to the orchestrator and the
//! MCP server. Sources: a JSON file (`--config`), inline JSON in
//! `VENV_SANDBOX_CONFIG`, then per-field environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Inline JSON configuration.
pub const CONFIG_ENV: &str = "VENV_SANDBOX_CONFIG";
/// Overrides [`Config::python`].
pub const PYTHON_ENV: &str = "VENV_SANDBOX_PYTHON";
/// Overrides [`Config::timeout_seconds`].
pub const TIMEOUT_ENV: &str = "VENV_SANDBOX_TIMEOUT";

/// Top-level configuration for the service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base interpreter used to create each virtual environment.
    #[serde(default = "default_python")]
    pub python: String,

    /// Parent directory for per-request workspaces. System temp dir if unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Maximum time for `python -m venv`.
    #[serde(default = "default_provision_timeout")]
    pub provision_timeout_seconds: u64,

    /// Maximum time for the single `pip install` call.
    #[serde(default = "default_install_timeout")]
    pub install_timeout_seconds: u64,

    /// Maximum script execution time.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Approval-layer setting: remind the user that code runs on this host.
    #[serde(default = "default_true")]
    pub show_warnings: bool,

    /// Approval-layer setting: clients may skip confirmation when the user
    /// explicitly asked to run the code.
    #[serde(default)]
    pub quick_execute: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: default_python(),
            workspace_root: None,
            provision_timeout_seconds: default_provision_timeout(),
            install_timeout_seconds: default_install_timeout(),
            timeout_seconds: default_timeout(),
            show_warnings: true,
            quick_execute: false,
        }
    }
}

impl Config {
    /// Load from `VENV_SANDBOX_CONFIG` if set, otherwise defaults, then apply
    /// per-field overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(json) => {
                Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))?
            }
            Err(_) => {
                debug!("{CONFIG_ENV} not set, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a JSON file, then apply per-field overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_json(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(python) = lookup(PYTHON_ENV).filter(|v| !v.is_empty()) {
            self.python = python;
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.parse() {
                Ok(secs) => self.timeout_seconds = secs,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {TIMEOUT_ENV}"),
            }
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub const fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_seconds)
    }
}

fn default_python() -> String {
    "python3".into()
}

const fn default_provision_timeout() -> u64 {
    120
}

const fn default_install_timeout() -> u64 {
    300
}

const fn default_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}
