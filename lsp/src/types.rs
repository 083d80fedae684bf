//! Public types consumed by the tool surface.
//!
//! These types define the interface between `cpplens-lsp` and its callers:
//! the tool layer constructs a [`ClangdConfig`], runs queries through the
//! client, and reads normalized results ([`Location`], [`SymbolInfo`],
//! [`CallEntry`]) plus readiness state ([`IndexingStatus`],
//! [`StatusReport`]).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_command() -> String {
    String::from("clangd")
}

fn default_timeout_secs() -> u64 {
    30
}

/// Configuration for spawning and driving the language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ClangdConfig {
    /// Executable name or path. Resolved through `PATH` at spawn time.
    #[serde(default = "default_command")]
    pub command: String,
    /// Full argument list passed to the server.
    #[serde(default)]
    pub args: Vec<String>,
    /// Deadline for every request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClangdConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClangdConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Lifecycle state of a client. Transitions are monotonic except that any
/// live state can fall to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Starting = 0,
    Initializing = 1,
    Ready = 2,
    ShuttingDown = 3,
    Closed = 4,
    Failed = 5,
}

impl ClientState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::ShuttingDown,
            4 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A source location, 1-based for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// A document or workspace symbol, possibly with nested children
/// (hierarchical document symbols).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Human-readable symbol kind ("Class", "Method", ...).
    pub kind: String,
    /// Absent for hierarchical document symbols, which are implicitly in
    /// the queried document.
    pub file: Option<PathBuf>,
    pub line: u32,
    pub column: u32,
    pub children: Vec<SymbolInfo>,
}

/// One entry in a call-hierarchy result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallEntry {
    pub name: String,
    pub kind: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    /// Positions of the individual call sites inside the caller/callee.
    pub call_sites: Vec<CallSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub line: u32,
    pub column: u32,
}

/// An opaque call-hierarchy item as returned by `prepareCallHierarchy`.
///
/// The raw value must be echoed back verbatim in `incomingCalls` /
/// `outgoingCalls` requests, so it is kept unparsed; accessors pull out the
/// display fields.
#[derive(Debug, Clone)]
pub struct CallHierarchyItem {
    raw: serde_json::Value,
}

impl CallHierarchyItem {
    pub(crate) fn new(raw: serde_json::Value) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.raw.get("name").and_then(|v| v.as_str()).unwrap_or("")
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        symbol_kind_label(self.raw.get("kind").and_then(|v| v.as_u64()).unwrap_or(0))
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        self.raw.get("uri").and_then(|v| v.as_str()).unwrap_or("")
    }

    #[must_use]
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}

/// Rollup of `$/progress` notifications whose work title names indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStatus {
    pub in_progress: bool,
    pub percentage: Option<u32>,
    pub message: String,
}

impl IndexingStatus {
    /// Compact label: `"idle"`, `"indexing"` or `"indexing (NN%)"`.
    #[must_use]
    pub fn label(&self) -> String {
        if !self.in_progress {
            return String::from("idle");
        }
        match self.percentage {
            Some(pct) => format!("indexing ({pct}%)"),
            None => String::from("indexing"),
        }
    }
}

/// Read-only snapshot of the manager, for status reporting.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub running: bool,
    pub project_root: Option<PathBuf>,
    pub open_files: usize,
    /// Rendered [`IndexingStatus::label`].
    pub indexing: String,
    /// Most recent initialisation failure, if the client is not running.
    pub last_error: Option<String>,
}

/// Human-readable name for an LSP `SymbolKind` value.
#[must_use]
pub fn symbol_kind_label(kind: u64) -> &'static str {
    match kind {
        1 => "File",
        2 => "Module",
        3 => "Namespace",
        4 => "Package",
        5 => "Class",
        6 => "Method",
        7 => "Property",
        8 => "Field",
        9 => "Constructor",
        10 => "Enum",
        11 => "Interface",
        12 => "Function",
        13 => "Variable",
        14 => "Constant",
        15 => "String",
        16 => "Number",
        17 => "Boolean",
        18 => "Array",
        19 => "Object",
        20 => "Key",
        21 => "Null",
        22 => "EnumMember",
        23 => "Struct",
        24 => "Event",
        25 => "Operator",
        26 => "TypeParameter",
        _ => "Unknown",
    }
}
