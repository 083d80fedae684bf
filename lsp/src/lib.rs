//! LSP client runtime for driving clangd on behalf of agent tools.

pub mod codec;
pub mod query;
pub mod types;

pub(crate) mod protocol;

mod client;
mod error;
mod manager;

pub use client::LspClient;
pub use error::Error;
pub use manager::LspManager;
pub use types::{
    CallEntry, CallHierarchyItem, CallSite, ClangdConfig, ClientState, IndexingStatus, Location,
    StatusReport, SymbolInfo,
};

pub type Result<T> = std::result::Result<T, Error>;
