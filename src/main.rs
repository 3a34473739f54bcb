//! venv-sandbox-mcp
//!
//! MCP server that runs Python code in a fresh virtual environment per call.
//! Can also run a single script file from the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use venv_sandbox_mcp::config::Config;
use venv_sandbox_mcp::mcp;
use venv_sandbox_mcp::orchestrator::{ExecutionRequest, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "venv-sandbox-mcp")]
#[command(about = "MCP server for ephemeral virtualenv-isolated Python execution")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long, conflicts_with = "script")]
    stdio: bool,

    /// Run this Python file once and print the outcome
    #[arg(long)]
    script: Option<PathBuf>,

    /// Package to install before running --script (repeatable)
    #[arg(long = "dependency", requires = "script")]
    dependencies: Vec<String>,

    /// JSON configuration file (defaults to VENV_SANDBOX_CONFIG or built-ins)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(
        python = %config.python,
        timeout_seconds = config.timeout_seconds,
        "Loaded configuration"
    );

    let orchestrator = Orchestrator::from_config(&config);

    if let Some(path) = &args.script {
        let code = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let request = ExecutionRequest::python(code).with_dependencies(args.dependencies);

        let progress = |message: &str| eprintln!("{message}...");
        let outcome = orchestrator.execute(&request, &progress).await;
        println!("{outcome}");

        return Ok(if outcome.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    if args.stdio {
        mcp::serve_stdio(config, orchestrator).await?;
    } else {
        anyhow::bail!("Pass --stdio to serve MCP or --script FILE to run once");
    }

    Ok(ExitCode::SUCCESS)
}
