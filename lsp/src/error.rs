//! Error type shared across the client runtime.

use std::path::PathBuf;

use crate::types::ClientState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed bytes from the server (bad headers, truncated frame,
    /// invalid JSON). Fatal for the client.
    #[error("malformed frame from language server: {0}")]
    Framing(String),

    /// The server closed its stdout between frames. Fatal for the client.
    #[error("language server closed the transport")]
    TransportEof,

    /// A structurally valid but semantically broken message (missing
    /// fields, unusable values). Logged and dropped unless it indicates a
    /// framing-level break.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server answered a request with an LSP error object.
    #[error("language server error {code}: {message}")]
    Server { code: i64, message: String },

    /// The per-request deadline elapsed before a response arrived.
    #[error("request timed out: {method}")]
    Timeout { method: &'static str },

    /// The operation was aborted by shutdown or transport failure.
    #[error("request cancelled")]
    Cancelled,

    /// The client is not in a state that admits this operation.
    #[error("language server client is not ready (state: {0})")]
    NotReady(ClientState),

    /// A position query or `close` referenced a document that was never
    /// opened.
    #[error("document not open: {0}")]
    NotOpen(url::Url),

    /// `open` was called for a document that is already open.
    #[error("document already open: {0}")]
    AlreadyOpen(url::Url),

    /// The manager already holds a client for a different project root.
    #[error("language server is bound to {active}, not {requested}; reset first", active = .active.display(), requested = .requested.display())]
    ProjectMismatch { active: PathBuf, requested: PathBuf },

    /// The server executable could not be resolved or spawned.
    #[error("failed to spawn language server: {0}")]
    Spawn(String),

    #[error("cannot convert path to file URI: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
