//! Configuration: an optional JSON file plus environment overrides.
//!
//! Resolution order: `CPPLENS_CONFIG` names a file to load; otherwise
//! `./cpplens.json` is used when present; otherwise everything defaults.
//! `CPPLENS_PROJECT_ROOT`, `CPPLENS_CLANGD`, `CPPLENS_COMPILE_COMMANDS_DIR`
//! and `CPPLENS_LOG` override individual fields afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cpplens_lsp::ClangdConfig;
use serde::Deserialize;

fn default_command() -> String {
    String::from("clangd")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    String::from("info")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Project the language server is bound to. Defaults to the current
    /// directory.
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    #[serde(default)]
    pub clangd: ClangdSection,
    /// Default tracing filter; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// When set, logs are appended to `cpplens-mcp.log` in this directory
    /// instead of stderr.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: None,
            clangd: ClangdSection::default(),
            log_filter: default_log_filter(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClangdSection {
    #[serde(default = "default_command")]
    pub command: String,
    /// Extra arguments appended after the built-in ones.
    #[serde(default)]
    pub args: Vec<String>,
    /// Where compile_commands.json lives. Defaults to the project root.
    #[serde(default)]
    pub compile_commands_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClangdSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            compile_commands_dir: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("CPPLENS_CONFIG").map(PathBuf::from);
        let fallback = PathBuf::from("cpplens.json");
        let path = explicit.or_else(|| fallback.exists().then_some(fallback));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(root) = get("CPPLENS_PROJECT_ROOT") {
            self.project_root = Some(PathBuf::from(root));
        }
        if let Some(command) = get("CPPLENS_CLANGD") {
            self.clangd.command = command;
        }
        if let Some(dir) = get("CPPLENS_COMPILE_COMMANDS_DIR") {
            self.clangd.compile_commands_dir = Some(PathBuf::from(dir));
        }
        if let Some(filter) = get("CPPLENS_LOG") {
            self.log_filter = filter;
        }
        if let Some(dir) = get("CPPLENS_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
    }

    /// The project root the server binds to, absolute.
    pub fn project_root(&self) -> Result<PathBuf> {
        match &self.project_root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().context("resolving current directory"),
        }
    }

    /// Assemble the clangd invocation for `project_root`.
    pub fn clangd_config(&self, project_root: &Path) -> ClangdConfig {
        let compile_commands_dir = self
            .clangd
            .compile_commands_dir
            .clone()
            .unwrap_or_else(|| project_root.to_path_buf());

        let mut args = vec![
            String::from("--log=error"),
            String::from("--pretty"),
            String::from("--background-index"),
            format!("--compile-commands-dir={}", compile_commands_dir.display()),
            String::from("-j=2"),
        ];
        args.extend(self.clangd.args.iter().cloned());

        ClangdConfig {
            command: self.clangd.command.clone(),
            args,
            request_timeout_secs: self.clangd.request_timeout_secs,
        }
    }
}
