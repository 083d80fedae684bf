//! MCP tool definitions over the query surface.
//!
//! Ten read-only tools: `lsp_status`, `goto_definition`, `find_references`,
//! `hover`, `document_symbol`, `workspace_symbol`, `goto_implementation`,
//! `incoming_calls`, `outgoing_calls`, `wait_for_file`.
//!
//! Failures are returned as explanatory text rather than MCP protocol
//! errors, so the agent can read them and adjust (retry after
//! `wait_for_file`, fix a path, and so on).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cpplens_lsp::query::{self, Annotated};
use cpplens_lsp::{CallEntry, ClangdConfig, Location, LspClient, LspManager, SymbolInfo};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, ListToolsResult};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;

const WORKSPACE_SYMBOL_LIMIT: usize = 50;

/// Tool parameters: file path plus position.
#[derive(Deserialize, JsonSchema)]
pub struct PositionParams {
    /// Absolute path to the C/C++ source file.
    pub file_path: String,
    /// Line number, 1-based as shown in editors.
    pub line: u32,
    /// Column number, 1-based as shown in editors.
    pub column: u32,
}

/// Tool parameter: a file path.
#[derive(Deserialize, JsonSchema)]
pub struct FileParams {
    /// Absolute path to the C/C++ source file.
    pub file_path: String,
}

/// Tool parameter: a symbol search query.
#[derive(Deserialize, JsonSchema)]
pub struct SymbolQueryParams {
    /// Symbol name to search for; substring match, may be empty.
    pub query: String,
}

fn default_include_declaration() -> bool {
    true
}

#[derive(Deserialize, JsonSchema)]
pub struct ReferencesParams {
    /// Absolute path to the C/C++ source file.
    pub file_path: String,
    /// Line number, 1-based as shown in editors.
    pub line: u32,
    /// Column number, 1-based as shown in editors.
    pub column: u32,
    /// Whether the declaration itself is listed among the references.
    #[serde(default = "default_include_declaration")]
    pub include_declaration: bool,
}

fn default_wait_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, JsonSchema)]
pub struct WaitForFileParams {
    /// Absolute path to the C/C++ source file.
    pub file_path: String,
    /// Maximum seconds to wait for the file to be indexed.
    #[serde(default = "default_wait_timeout_secs")]
    pub timeout_secs: u64,
}

fn text(result: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(result.into())])
}

fn format_locations(header: &str, locations: &[Location]) -> String {
    let mut lines = vec![header.to_string()];
    lines.extend(locations.iter().map(|loc| format!("  {loc}")));
    lines.join("\n")
}

fn format_symbol_tree(lines: &mut Vec<String>, symbols: &[SymbolInfo], indent: usize) {
    for symbol in symbols {
        let prefix = "  ".repeat(indent + 1);
        match &symbol.file {
            Some(file) => lines.push(format!(
                "{prefix}{}: {} - {}:{}",
                symbol.kind,
                symbol.name,
                file.display(),
                symbol.line
            )),
            None => lines.push(format!(
                "{prefix}{}: {} (line {})",
                symbol.kind, symbol.name, symbol.line
            )),
        }
        format_symbol_tree(lines, &symbol.children, indent + 1);
    }
}

fn format_calls(header: &str, calls: &[CallEntry]) -> String {
    let mut lines = vec![header.to_string()];
    for call in calls {
        lines.push(format!("  {}: {}", call.kind, call.name));
        lines.push(format!(
            "    Location: {}:{}:{}",
            call.file.display(),
            call.line,
            call.column
        ));
        for site in &call.call_sites {
            lines.push(format!("    Call site: line {}", site.line));
        }
    }
    lines.join("\n")
}

/// Append the readiness hint, when present, to an empty-result message.
fn with_hint(mut message: String, annotated: &Annotated<Vec<CallEntry>>) -> String {
    if let Some(hint) = &annotated.hint {
        message.push('\n');
        message.push_str(hint);
    }
    message
}

/// MCP tools backed by the shared language server client.
#[derive(Clone)]
pub struct CppTools {
    project_root: PathBuf,
    clangd: ClangdConfig,
    manager: &'static LspManager,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CppTools {
    pub fn new(project_root: PathBuf, clangd: ClangdConfig, manager: &'static LspManager) -> Self {
        Self {
            project_root,
            clangd,
            manager,
            tool_router: Self::tool_router(),
        }
    }

    /// The shared client, started on first use. Errors become agent-facing
    /// text.
    async fn client(&self) -> Result<Arc<LspClient>, String> {
        self.manager
            .get(&self.clangd, &self.project_root)
            .await
            .map_err(|e| format!("language server unavailable: {e}"))
    }

    #[tool(
        name = "lsp_status",
        description = "Report language server status: whether clangd is running, the project root, open file count and background indexing progress."
    )]
    async fn lsp_status(&self) -> Result<CallToolResult, McpError> {
        let status = self.manager.status().await;
        let mut lines = vec![
            format!(
                "LSP status: {}",
                if status.running { "running" } else { "not running" }
            ),
            format!(
                "  Project: {}",
                status
                    .project_root
                    .as_deref()
                    .unwrap_or(self.project_root.as_path())
                    .display()
            ),
            format!("  Open files: {}", status.open_files),
            format!("  Indexing: {}", status.indexing),
        ];
        if let Some(error) = &status.last_error {
            lines.push(format!("  Last error: {error}"));
        }
        Ok(text(lines.join("\n")))
    }

    #[tool(
        name = "goto_definition",
        description = "Find where the symbol at a position is defined. Returns file:line:column locations."
    )]
    async fn goto_definition(
        &self,
        params: Parameters<PositionParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::definition(&client, Path::new(&p.file_path), p.line, p.column).await {
            Ok(locations) if locations.is_empty() => Ok(text(format!(
                "No definition found at {}:{}:{}",
                p.file_path, p.line, p.column
            ))),
            Ok(locations) => Ok(text(format_locations("Definition location(s):", &locations))),
            Err(e) => Ok(text(format!("Definition query failed: {e}"))),
        }
    }

    #[tool(
        name = "find_references",
        description = "Find all references to the symbol at a position. Returns file:line:column locations."
    )]
    async fn find_references(
        &self,
        params: Parameters<ReferencesParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::references(
            &client,
            Path::new(&p.file_path),
            p.line,
            p.column,
            p.include_declaration,
        )
        .await
        {
            Ok(locations) if locations.is_empty() => Ok(text(format!(
                "No references found at {}:{}:{}",
                p.file_path, p.line, p.column
            ))),
            Ok(locations) => Ok(text(format_locations(
                &format!("References ({} found):", locations.len()),
                &locations,
            ))),
            Err(e) => Ok(text(format!("References query failed: {e}"))),
        }
    }

    #[tool(
        name = "hover",
        description = "Get type signature and documentation for the symbol at a position."
    )]
    async fn hover(&self, params: Parameters<PositionParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::hover(&client, Path::new(&p.file_path), p.line, p.column).await {
            Ok(Some(contents)) => Ok(text(format!("Hover information:\n{contents}"))),
            Ok(None) => Ok(text(format!(
                "No hover information at {}:{}:{}",
                p.file_path, p.line, p.column
            ))),
            Err(e) => Ok(text(format!("Hover query failed: {e}"))),
        }
    }

    #[tool(
        name = "document_symbol",
        description = "List all symbols (classes, functions, fields) in a file as an indented tree."
    )]
    async fn document_symbol(
        &self,
        params: Parameters<FileParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::document_symbol(&client, Path::new(&p.file_path)).await {
            Ok(symbols) if symbols.is_empty() => {
                Ok(text(format!("No symbols found in {}", p.file_path)))
            }
            Ok(symbols) => {
                let mut lines = vec![format!("Symbols in {}:", p.file_path)];
                format_symbol_tree(&mut lines, &symbols, 0);
                Ok(text(lines.join("\n")))
            }
            Err(e) => Ok(text(format!("Document symbol query failed: {e}"))),
        }
    }

    #[tool(
        name = "workspace_symbol",
        description = "Search for symbols across the whole project by name. Substring match; an empty query lists what the index knows."
    )]
    async fn workspace_symbol(
        &self,
        params: Parameters<SymbolQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::workspace_symbol(&client, &p.query).await {
            Ok(symbols) if symbols.is_empty() => Ok(text(format!(
                "No symbols matching '{}' found in workspace",
                p.query
            ))),
            Ok(symbols) => {
                let mut lines = vec![format!(
                    "Symbols matching '{}' ({} found):",
                    p.query,
                    symbols.len()
                )];
                for symbol in symbols.iter().take(WORKSPACE_SYMBOL_LIMIT) {
                    let place = symbol
                        .file
                        .as_ref()
                        .map(|f| format!("{}:{}", f.display(), symbol.line))
                        .unwrap_or_else(|| format!("line {}", symbol.line));
                    lines.push(format!("  {}: {} - {}", symbol.kind, symbol.name, place));
                }
                if symbols.len() > WORKSPACE_SYMBOL_LIMIT {
                    lines.push(format!(
                        "  ... and {} more",
                        symbols.len() - WORKSPACE_SYMBOL_LIMIT
                    ));
                }
                Ok(text(lines.join("\n")))
            }
            Err(e) => Ok(text(format!("Workspace symbol query failed: {e}"))),
        }
    }

    #[tool(
        name = "goto_implementation",
        description = "Find implementations of the interface or virtual method at a position. Depends on the background index; if empty, wait_for_file and retry."
    )]
    async fn goto_implementation(
        &self,
        params: Parameters<PositionParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::implementation(&client, Path::new(&p.file_path), p.line, p.column).await {
            Ok(annotated) if annotated.items.is_empty() => {
                let mut message = format!(
                    "No implementations found at {}:{}:{}",
                    p.file_path, p.line, p.column
                );
                if let Some(hint) = annotated.hint {
                    message.push('\n');
                    message.push_str(&hint);
                }
                Ok(text(message))
            }
            Ok(annotated) => Ok(text(format_locations(
                &format!("Implementations ({} found):", annotated.items.len()),
                &annotated.items,
            ))),
            Err(e) => Ok(text(format!("Implementation query failed: {e}"))),
        }
    }

    #[tool(
        name = "incoming_calls",
        description = "Find all callers of the function at a position, with call sites. Depends on the background index; if empty, wait_for_file and retry."
    )]
    async fn incoming_calls(
        &self,
        params: Parameters<PositionParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::incoming_calls(&client, Path::new(&p.file_path), p.line, p.column).await {
            Ok(annotated) if annotated.items.is_empty() => Ok(text(with_hint(
                format!(
                    "No incoming calls found for symbol at {}:{}:{}",
                    p.file_path, p.line, p.column
                ),
                &annotated,
            ))),
            Ok(annotated) => Ok(text(format_calls(
                &format!("Incoming calls ({} callers):", annotated.items.len()),
                &annotated.items,
            ))),
            Err(e) => Ok(text(format!("Incoming calls query failed: {e}"))),
        }
    }

    #[tool(
        name = "outgoing_calls",
        description = "Find all functions called by the function at a position, with call sites. Depends on the background index; if empty, wait_for_file and retry."
    )]
    async fn outgoing_calls(
        &self,
        params: Parameters<PositionParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        match query::outgoing_calls(&client, Path::new(&p.file_path), p.line, p.column).await {
            Ok(annotated) if annotated.items.is_empty() => Ok(text(with_hint(
                format!(
                    "No outgoing calls found for symbol at {}:{}:{}",
                    p.file_path, p.line, p.column
                ),
                &annotated,
            ))),
            Ok(annotated) => Ok(text(format_calls(
                &format!("Outgoing calls ({} callees):", annotated.items.len()),
                &annotated.items,
            ))),
            Err(e) => Ok(text(format!("Outgoing calls query failed: {e}"))),
        }
    }

    #[tool(
        name = "wait_for_file",
        description = "Open a file and wait until clangd has processed it (first diagnostics batch). Use before index-dependent queries on cold files."
    )]
    async fn wait_for_file(
        &self,
        params: Parameters<WaitForFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return Ok(text(message)),
        };
        let timeout = Duration::from_secs(p.timeout_secs);
        match query::wait_for_file(&client, Path::new(&p.file_path), timeout).await {
            Ok(true) => Ok(text(format!("{} is ready", p.file_path))),
            Ok(false) => Ok(text(format!(
                "Timed out after {}s waiting for {}; indexing status: {}",
                p.timeout_secs,
                p.file_path,
                client.indexing_status().label()
            ))),
            Err(e) => Ok(text(format!("wait_for_file failed: {e}"))),
        }
    }
}

/// Delegation methods for `ServerHandler` integration.
impl CppTools {
    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.tool_router.list_all(),
            ..ListToolsResult::default()
        }
    }

    pub async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = ToolCallContext::new(self, request, context);
        self.tool_router.call(ctx).await
    }
}
