//! Query surface — thin, stateless helpers over [`LspClient`].
//!
//! Callers hand in filesystem paths and 1-based editor coordinates; this
//! layer opens files on demand (reading their contents from disk exactly
//! once per client lifetime), converts to URIs and 0-based LSP positions,
//! and annotates index-sensitive queries with a readiness hint when they
//! come back empty.

use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::client::LspClient;
use crate::error::Error;
use crate::protocol::path_to_uri;
use crate::types::{CallEntry, CallHierarchyItem, Location, SymbolInfo};

/// A query result plus an optional readiness hint.
///
/// Implementation and call-hierarchy queries depend on the background
/// index; an empty result frequently means "not indexed yet" rather than
/// "nothing there", and readiness state is only observable at this layer.
#[derive(Debug)]
pub struct Annotated<T> {
    pub items: T,
    pub hint: Option<String>,
}

/// LSP language id for a C/C++ family file. Headers default to C++, which
/// is what clangd expects for mixed projects.
#[must_use]
pub fn language_id_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("c") => "c",
        _ => "cpp",
    }
}

/// Open `path` in the server if it is not already open, reading the file
/// contents from disk. Invalid UTF-8 is replaced rather than rejected.
pub async fn ensure_open(client: &LspClient, path: &Path) -> Result<Url, Error> {
    let uri = path_to_uri(path)?;
    if client.is_open(&uri) {
        return Ok(uri);
    }

    let bytes = tokio::fs::read(path).await?;
    let text = String::from_utf8_lossy(&bytes);
    match client.open(&uri, &text, language_id_for(path)).await {
        Ok(()) => Ok(uri),
        // A concurrent query opened it first; the document is there.
        Err(Error::AlreadyOpen(_)) => Ok(uri),
        Err(e) => Err(e),
    }
}

fn to_lsp(value: u32) -> u32 {
    value.saturating_sub(1)
}

pub async fn definition(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Vec<Location>, Error> {
    let uri = ensure_open(client, path).await?;
    client.definition(&uri, to_lsp(line), to_lsp(column)).await
}

pub async fn references(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
    include_declaration: bool,
) -> Result<Vec<Location>, Error> {
    let uri = ensure_open(client, path).await?;
    client
        .references(&uri, to_lsp(line), to_lsp(column), include_declaration)
        .await
}

pub async fn hover(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Option<String>, Error> {
    let uri = ensure_open(client, path).await?;
    client.hover(&uri, to_lsp(line), to_lsp(column)).await
}

pub async fn document_symbol(client: &LspClient, path: &Path) -> Result<Vec<SymbolInfo>, Error> {
    let uri = ensure_open(client, path).await?;
    client.document_symbol(&uri).await
}

pub async fn workspace_symbol(client: &LspClient, query: &str) -> Result<Vec<SymbolInfo>, Error> {
    client.workspace_symbol(query).await
}

pub async fn implementation(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Annotated<Vec<Location>>, Error> {
    let uri = ensure_open(client, path).await?;
    let items = client
        .implementation(&uri, to_lsp(line), to_lsp(column))
        .await?;
    Ok(annotate_if_empty(client, items))
}

pub async fn prepare_call_hierarchy(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Vec<CallHierarchyItem>, Error> {
    let uri = ensure_open(client, path).await?;
    client
        .prepare_call_hierarchy(&uri, to_lsp(line), to_lsp(column))
        .await
}

/// Prepare the call hierarchy at a position and list the callers of the
/// first item there.
pub async fn incoming_calls(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Annotated<Vec<CallEntry>>, Error> {
    let items = prepare_call_hierarchy(client, path, line, column).await?;
    let Some(item) = items.first() else {
        return Ok(annotate_if_empty(client, Vec::new()));
    };
    let calls = client.incoming_calls(item).await?;
    Ok(annotate_if_empty(client, calls))
}

/// Prepare the call hierarchy at a position and list the callees of the
/// first item there.
pub async fn outgoing_calls(
    client: &LspClient,
    path: &Path,
    line: u32,
    column: u32,
) -> Result<Annotated<Vec<CallEntry>>, Error> {
    let items = prepare_call_hierarchy(client, path, line, column).await?;
    let Some(item) = items.first() else {
        return Ok(annotate_if_empty(client, Vec::new()));
    };
    let calls = client.outgoing_calls(item).await?;
    Ok(annotate_if_empty(client, calls))
}

/// Open `path` if needed and wait for its first diagnostics batch.
/// `true` means the file is ready; `false` means the timeout elapsed.
pub async fn wait_for_file(
    client: &LspClient,
    path: &Path,
    timeout: Duration,
) -> Result<bool, Error> {
    let uri = ensure_open(client, path).await?;
    client.wait_for_file(&uri, timeout).await
}

fn annotate_if_empty<T>(client: &LspClient, items: Vec<T>) -> Annotated<Vec<T>> {
    let hint = items.is_empty().then(|| readiness_hint(client));
    Annotated { items, hint }
}

fn readiness_hint(client: &LspClient) -> String {
    format!(
        "no results — indexing status: {}. The file may not be fully indexed yet; \
         call wait_for_file and retry.",
        client.indexing_status().label()
    )
}
