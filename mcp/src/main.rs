//! cpplens-mcp: MCP server giving agents clangd code intelligence.
//!
//! Architecture:
//! ```text
//! agent <-MCP (stdio)-> cpplens-mcp <-LSP (child stdio)-> clangd
//! ```
//!
//! One warm clangd process serves every tool call in the session, bound to
//! a single project root. Logging goes to stderr (or a configured log
//! file) because stdout carries the MCP transport.

mod config;
mod tools;

use anyhow::{Context, Result};
use cpplens_lsp::LspManager;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ServerCapabilities, ServerInfo, ToolsCapability,
};
use rmcp::service::{RequestContext, ServiceExt};
use rmcp::transport::io::stdio;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};

use crate::config::Config;
use crate::tools::CppTools;

/// MCP server wrapping the clangd tools.
#[derive(Clone)]
struct CpplensServer {
    tools: CppTools,
}

impl ServerHandler for CpplensServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Provides C/C++ code intelligence via clangd. Use goto_definition, \
                 find_references and hover for symbol questions; document_symbol and \
                 workspace_symbol to survey code; goto_implementation, incoming_calls \
                 and outgoing_calls for structure (these need the background index — \
                 if they come back empty, call wait_for_file on the file and retry). \
                 lsp_status reports server and indexing state."
                    .into(),
            ),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..ServerCapabilities::default()
            },
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<rmcp::model::ListToolsResult, McpError> {
        Ok(self.tools.list_tools())
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        self.tools.call_tool(request, context).await
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter));

    // stdout is the MCP transport; logs go to stderr or a file.
    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let path = dir.join("cpplens-mcp.log");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    let project_root = config.project_root()?;
    let clangd = config.clangd_config(&project_root);
    tracing::info!(
        project_root = %project_root.display(),
        clangd = %clangd.command,
        "starting cpplens-mcp"
    );

    let manager = LspManager::global();

    // Warm the server eagerly so the first tool call is fast. A failure
    // here is not fatal: tools retry on use and lsp_status reports it.
    if let Err(e) = manager.get(&clangd, &project_root).await {
        tracing::warn!("language server warm-up failed: {e}");
    }

    let tools = CppTools::new(project_root, clangd, manager);
    let server = CpplensServer { tools };

    let transport = stdio();
    let service = match server.serve(transport).await {
        Ok(service) => service,
        Err(e) => {
            manager.reset().await;
            return Err(e).context("failed to start MCP server");
        }
    };

    let waiting_result = service.waiting().await;

    // The agent session is over; take the language server down with it.
    manager.reset().await;

    waiting_result.context("MCP server exited with an error")?;
    Ok(())
}
