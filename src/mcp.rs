//! MCP server implementation using rmcp.
//!
//! Exposes the orchestrator as a single `execute` tool. Whether a call is
//! allowed at all is the client's decision; a request that arrives here is
//! treated as approved.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::orchestrator::{ExecutionRequest, Orchestrator, TracingSink, SUPPORTED_LANGUAGE};

/// MCP server for ephemeral Python execution.
#[derive(Clone)]
pub struct SandboxServer {
    config: Arc<Config>,
    orchestrator: Orchestrator,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// The code to execute.
    #[schemars(
        description = "Python code to execute. May be wrapped in a ```python fenced block"
    )]
    pub code: String,

    /// Language of the code. Only "python" is accepted.
    #[serde(alias = "code_lang")]
    #[schemars(description = "Programming language of the code. Only 'python' is supported")]
    pub code_language: String,

    /// Packages to install before running.
    #[serde(default)]
    #[schemars(description = "Python packages to pip install before running the code")]
    pub dependencies: Vec<String>,

    /// Explanation shown to the user by the client. Not interpreted here.
    #[serde(default)]
    #[schemars(description = "Explanation of the code for the user")]
    pub explanation: Option<String>,

    /// Whether the user explicitly asked to run this code. Not interpreted here.
    #[serde(default)]
    #[schemars(description = "Whether the user directly asked to execute this code")]
    pub execution_confirmed: bool,
}

impl From<ExecuteParams> for ExecutionRequest {
    fn from(params: ExecuteParams) -> Self {
        Self {
            code: params.code,
            code_language: params.code_language,
            dependencies: params.dependencies,
        }
    }
}

#[tool_router]
impl SandboxServer {
    /// Create a new sandbox server.
    pub fn new(config: Config, orchestrator: Orchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            tool_router: Self::tool_router(),
        }
    }

    /// Execute Python code in a fresh virtual environment.
    #[tool(description = "Execute Python code in a fresh, throwaway virtual environment")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(
            confirmed = params.execution_confirmed,
            has_explanation = params.explanation.is_some(),
            "Execute requested"
        );

        let request = ExecutionRequest::from(params);
        info!(
            code_len = request.code.len(),
            dependencies = ?request.dependencies,
            "Executing code"
        );

        let outcome = self.orchestrator.execute(&request, &TracingSink).await;
        let text = outcome.to_string();

        if outcome.is_success() {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }

    fn instructions(&self) -> String {
        let mut text = format!(
            "Execute {SUPPORTED_LANGUAGE} code in a fresh virtual environment that is \
             deleted after every call.\n\
             \n\
             Use the 'execute' tool with:\n\
             - code: the code to run (a ```python fenced block is accepted)\n\
             - code_language: '{SUPPORTED_LANGUAGE}'\n\
             - dependencies: packages to pip install first (optional)\n\
             \n\
             Each call times out after {}s.",
            self.config.timeout_seconds
        );
        if self.config.quick_execute {
            text.push_str(
                "\nConfirmation may be skipped when the user explicitly asked to run the code \
                 (set execution_confirmed).",
            );
        } else {
            text.push_str("\nAsk the user to confirm before every execution.");
        }
        if self.config.show_warnings {
            text.push_str(
                "\n\nWARNING: code is executed on the host system with the server's \
                 permissions. Make sure the code is safe to execute.",
            );
        }
        text
    }
}

#[tool_handler]
impl ServerHandler for SandboxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "venv-sandbox-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(self.instructions()),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio(config: Config, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let server = SandboxServer::new(config, orchestrator);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
