//! Client runtime — owns the language server subprocess, correlates
//! request/response traffic and tracks readiness state.
//!
//! One reader task drains framed messages from the server; one writer task
//! serialises outgoing frames. Callers park on a oneshot slot in the
//! pending-request table until their response arrives or their deadline
//! fires. Server-push notifications (`publishDiagnostics`, `$/progress`)
//! mutate shared readiness state that queries and `wait_for_file` observe.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc, oneshot};
use url::Url;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Error;
use crate::protocol::{
    self, IncomingFrame, Notification, ProgressParams, PublishDiagnosticsParams, Request,
    RpcResponse,
};
use crate::types::{CallEntry, CallHierarchyItem, ClientState, IndexingStatus, Location, SymbolInfo};

/// Bound on the `shutdown` round-trip and on waiting for the child to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Request id counter plus in-flight slots. Id allocation, slot insertion
/// and write-queue submission happen under this one lock, which is what
/// makes wire order equal id order.
struct RequestTable {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<RpcResponse>>,
}

/// Readiness state mutated by the reader task and read by queries.
struct ReadyState {
    /// URIs that have received at least one `publishDiagnostics` batch.
    /// Monotonic for the client's lifetime.
    ready_files: HashSet<Url>,
    /// Per-URI wait primitives; retained after signalling so late waiters
    /// short-circuit on `ready_files` instead.
    waiters: HashMap<Url, Arc<Notify>>,
    /// URIs with a `didOpen` sent and no `didClose`.
    open_docs: HashSet<Url>,
    indexing: IndexingStatus,
    /// Progress token of the indexing work we are tracking; `report` and
    /// `end` carry no title, so they are matched by token.
    indexing_token: Option<Value>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LspClient {
    state: Arc<AtomicU8>,
    requests: Arc<Mutex<RequestTable>>,
    ready: Arc<Mutex<ReadyState>>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    child: tokio::sync::Mutex<Option<Child>>,
    request_timeout: Duration,
    root_uri: Url,
}

impl LspClient {
    /// Spawn the configured language server for `project_root` and run the
    /// `initialize`/`initialized` handshake. The returned client is
    /// `Ready`; any failure kills the child and is returned as the error.
    pub async fn start(
        config: &crate::types::ClangdConfig,
        project_root: &Path,
    ) -> Result<Self, Error> {
        let resolved = which::which(&config.command)
            .map_err(|e| Error::Spawn(format!("{}: {e}", config.command)))?;
        let root_uri = protocol::path_to_uri(project_root)?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&config.args)
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("spawning {}: {e}", resolved.display())))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("child stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("child stdin not captured".into()))?;

        tracing::info!(server = %resolved.display(), root = %project_root.display(), "starting language server");

        let client = Self::from_parts(root_uri, config.request_timeout(), stdout, stdin, Some(child));
        match client.handshake().await {
            Ok(()) => Ok(client),
            Err(e) => {
                client.abort().await;
                Err(e)
            }
        }
    }

    /// Build a client over an already-connected transport (no child
    /// process) and run the handshake. Useful for servers managed by
    /// something else and for tests.
    pub async fn attach<R, W>(
        root_uri: Url,
        request_timeout: Duration,
        reader: R,
        writer: W,
    ) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let client = Self::from_parts(root_uri, request_timeout, reader, writer, None);
        match client.handshake().await {
            Ok(()) => Ok(client),
            Err(e) => {
                client.abort().await;
                Err(e)
            }
        }
    }

    fn from_parts<R, W>(
        root_uri: Url,
        request_timeout: Duration,
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ClientState::Initializing as u8));
        let requests = Arc::new(Mutex::new(RequestTable {
            next_id: 1,
            pending: HashMap::new(),
        }));
        let ready = Arc::new(Mutex::new(ReadyState {
            ready_files: HashSet::new(),
            waiters: HashMap::new(),
            open_docs: HashSet::new(),
            indexing: IndexingStatus::default(),
            indexing_token: None,
        }));

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("write to language server failed: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
            // Dropping the writer closes the stream; for a child process
            // that is the stdin EOF it needs to exit.
        });

        let reader_state = Arc::clone(&state);
        let reader_requests = Arc::clone(&requests);
        let reader_ready = Arc::clone(&ready);
        let reader_writer_tx = writer_tx.clone();
        tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => Self::dispatch_frame(
                        &frame,
                        &reader_requests,
                        &reader_ready,
                        &reader_writer_tx,
                    ),
                    Ok(None) => {
                        if shutting_down(&reader_state) {
                            tracing::debug!("language server transport closed");
                        } else {
                            tracing::warn!("language server closed the transport unexpectedly");
                            fatal_sweep(&reader_state, &reader_requests);
                        }
                        break;
                    }
                    Err(e) => {
                        if shutting_down(&reader_state) {
                            tracing::debug!("transport error during shutdown: {e}");
                        } else {
                            tracing::warn!("fatal transport error: {e}");
                            fatal_sweep(&reader_state, &reader_requests);
                        }
                        break;
                    }
                }
            }
        });

        Self {
            state,
            requests,
            ready,
            writer_tx,
            child: tokio::sync::Mutex::new(child),
            request_timeout,
            root_uri,
        }
    }

    async fn handshake(&self) -> Result<(), Error> {
        let _capabilities = self
            .raw_request(
                "initialize",
                Some(protocol::initialize_params(&self.root_uri)),
                self.request_timeout,
            )
            .await?;
        self.raw_notify("initialized", Some(json!({})))?;
        self.state.store(ClientState::Ready as u8, Ordering::SeqCst);
        tracing::debug!(root = %self.root_uri, "language server ready");
        Ok(())
    }

    // ── state and readiness accessors ──────────────────────────────────

    #[must_use]
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Ready
    }

    #[must_use]
    pub fn root_uri(&self) -> &Url {
        &self.root_uri
    }

    #[must_use]
    pub fn is_open(&self, uri: &Url) -> bool {
        lock(&self.ready).open_docs.contains(uri)
    }

    #[must_use]
    pub fn open_files_count(&self) -> usize {
        lock(&self.ready).open_docs.len()
    }

    /// Whether at least one diagnostics batch has arrived for `uri`.
    #[must_use]
    pub fn is_file_ready(&self, uri: &Url) -> bool {
        lock(&self.ready).ready_files.contains(uri)
    }

    #[must_use]
    pub fn indexing_status(&self) -> IndexingStatus {
        lock(&self.ready).indexing.clone()
    }

    #[must_use]
    pub fn is_indexing(&self) -> bool {
        lock(&self.ready).indexing.in_progress
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.requests).pending.len()
    }

    // ── document lifecycle ─────────────────────────────────────────────

    /// Send `didOpen` for `uri` with the document's full text.
    pub async fn open(&self, uri: &Url, text: &str, language_id: &str) -> Result<(), Error> {
        {
            let mut ready = lock(&self.ready);
            if !ready.open_docs.insert(uri.clone()) {
                return Err(Error::AlreadyOpen(uri.clone()));
            }
        }
        let sent = self.raw_notify(
            "textDocument/didOpen",
            Some(protocol::did_open_params(uri, language_id, text)),
        );
        if sent.is_err() {
            lock(&self.ready).open_docs.remove(uri);
        }
        sent
    }

    /// Send `didClose` for a previously opened `uri`.
    pub async fn close(&self, uri: &Url) -> Result<(), Error> {
        {
            let mut ready = lock(&self.ready);
            if !ready.open_docs.remove(uri) {
                return Err(Error::NotOpen(uri.clone()));
            }
        }
        let sent = self.raw_notify(
            "textDocument/didClose",
            Some(protocol::did_close_params(uri)),
        );
        if sent.is_err() {
            // The server never saw the close; keep local state truthful.
            lock(&self.ready).open_docs.insert(uri.clone());
        }
        sent
    }

    // ── queries ────────────────────────────────────────────────────────

    pub async fn definition(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, Error> {
        self.require_open(uri)?;
        let result = self
            .request(
                "textDocument/definition",
                protocol::position_params(uri, line, character),
            )
            .await?;
        Ok(protocol::normalize_locations(&result))
    }

    pub async fn references(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>, Error> {
        self.require_open(uri)?;
        let result = self
            .request(
                "textDocument/references",
                protocol::reference_params(uri, line, character, include_declaration),
            )
            .await?;
        Ok(protocol::normalize_locations(&result))
    }

    pub async fn hover(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
    ) -> Result<Option<String>, Error> {
        self.require_open(uri)?;
        let result = self
            .request(
                "textDocument/hover",
                protocol::position_params(uri, line, character),
            )
            .await?;
        Ok(protocol::extract_hover(&result))
    }

    pub async fn document_symbol(&self, uri: &Url) -> Result<Vec<SymbolInfo>, Error> {
        self.require_open(uri)?;
        let result = self
            .request(
                "textDocument/documentSymbol",
                protocol::document_symbol_params(uri),
            )
            .await?;
        Ok(protocol::normalize_symbols(&result))
    }

    /// Search symbols across the workspace. An empty query is valid and
    /// returns whatever the server considers a match.
    pub async fn workspace_symbol(&self, query: &str) -> Result<Vec<SymbolInfo>, Error> {
        let result = self
            .request("workspace/symbol", protocol::workspace_symbol_params(query))
            .await?;
        Ok(protocol::normalize_symbols(&result))
    }

    pub async fn implementation(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, Error> {
        self.require_open(uri)?;
        let result = self
            .request(
                "textDocument/implementation",
                protocol::position_params(uri, line, character),
            )
            .await?;
        Ok(protocol::normalize_locations(&result))
    }

    pub async fn prepare_call_hierarchy(
        &self,
        uri: &Url,
        line: u32,
        character: u32,
    ) -> Result<Vec<CallHierarchyItem>, Error> {
        self.require_open(uri)?;
        let result = self
            .request(
                "textDocument/prepareCallHierarchy",
                protocol::position_params(uri, line, character),
            )
            .await?;
        let items = match result {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        Ok(items.into_iter().map(CallHierarchyItem::new).collect())
    }

    pub async fn incoming_calls(
        &self,
        item: &CallHierarchyItem,
    ) -> Result<Vec<CallEntry>, Error> {
        let result = self
            .request(
                "callHierarchy/incomingCalls",
                protocol::call_hierarchy_params(item.raw()),
            )
            .await?;
        Ok(protocol::normalize_calls(&result, "from"))
    }

    pub async fn outgoing_calls(
        &self,
        item: &CallHierarchyItem,
    ) -> Result<Vec<CallEntry>, Error> {
        let result = self
            .request(
                "callHierarchy/outgoingCalls",
                protocol::call_hierarchy_params(item.raw()),
            )
            .await?;
        Ok(protocol::normalize_calls(&result, "to"))
    }

    /// Wait until the server has published diagnostics for `uri` at least
    /// once, or until `timeout` elapses. Returns immediately with `true`
    /// for URIs already in the file-ready set.
    pub async fn wait_for_file(&self, uri: &Url, timeout: Duration) -> Result<bool, Error> {
        let state = self.state();
        if state != ClientState::Ready {
            return Err(Error::NotReady(state));
        }

        let notify = {
            let mut ready = lock(&self.ready);
            if ready.ready_files.contains(uri) {
                return Ok(true);
            }
            Arc::clone(ready.waiters.entry(uri.clone()).or_default())
        };

        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        // The readiness edge may have landed between registering the
        // waiter and enabling it.
        if lock(&self.ready).ready_files.contains(uri) {
            return Ok(true);
        }

        Ok(tokio::time::timeout(timeout, notified).await.is_ok())
    }

    // ── shutdown ───────────────────────────────────────────────────────

    /// Gracefully stop the server: `shutdown` request (bounded), `exit`
    /// notification, transport close, bounded wait then kill. Sweeps every
    /// pending request. Idempotent, safe from any state.
    pub async fn shutdown(&self) -> Result<(), Error> {
        match self.state() {
            ClientState::Closed => return Ok(()),
            ClientState::Failed => {
                // Transport already torn down and pending swept; just make
                // sure the child is gone.
                let _ = self.writer_tx.send(WriterCommand::Shutdown);
                self.reap_child().await;
                return Ok(());
            }
            _ => {}
        }

        self.state
            .store(ClientState::ShuttingDown as u8, Ordering::SeqCst);

        match self.raw_request("shutdown", None, SHUTDOWN_TIMEOUT).await {
            Ok(_) => {}
            Err(e) => tracing::debug!("shutdown request failed: {e}"),
        }
        if let Err(e) = self.raw_notify("exit", None) {
            tracing::debug!("exit notification failed: {e}");
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown);

        self.reap_child().await;

        let mut table = lock(&self.requests);
        self.state.store(ClientState::Closed as u8, Ordering::SeqCst);
        table.pending.clear();
        Ok(())
    }

    async fn reap_child(&self) {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait())
                .await
                .is_err()
            {
                tracing::debug!("language server did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
        *guard = None;
    }

    /// Failure path for an aborted handshake: sweep, close the transport,
    /// kill the child.
    async fn abort(&self) {
        fatal_sweep(&self.state, &self.requests);
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let _ = child.kill().await;
        }
    }

    // ── internals ──────────────────────────────────────────────────────

    fn require_open(&self, uri: &Url) -> Result<(), Error> {
        if lock(&self.ready).open_docs.contains(uri) {
            Ok(())
        } else {
            Err(Error::NotOpen(uri.clone()))
        }
    }

    /// Which methods a state admits. `Ready` admits everything; the
    /// handshake and teardown methods are the only traffic allowed outside
    /// it.
    fn admit(&self, method: &str) -> Result<(), Error> {
        let state = self.state();
        let allowed = match state {
            ClientState::Ready => true,
            ClientState::Initializing => matches!(method, "initialize" | "initialized"),
            ClientState::ShuttingDown => matches!(method, "shutdown" | "exit"),
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::NotReady(state))
        }
    }

    async fn request(&self, method: &'static str, params: Value) -> Result<Value, Error> {
        self.raw_request(method, Some(params), self.request_timeout)
            .await
    }

    async fn raw_request(
        &self,
        method: &'static str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, Error> {
        let (id, rx) = {
            let mut table = lock(&self.requests);
            // Checked under the table lock so admission is atomic with the
            // shutdown/failure sweep.
            self.admit(method)?;

            let id = table.next_id;
            table.next_id += 1;
            let frame = serde_json::to_value(Request::new(id, method, params))
                .map_err(|e| Error::Protocol(format!("serializing request: {e}")))?;

            let (tx, rx) = oneshot::channel();
            table.pending.insert(id, tx);
            if self.writer_tx.send(WriterCommand::Send(frame)).is_err() {
                table.pending.remove(&id);
                return Err(Error::Cancelled);
            }
            (id, rx)
        };

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.error {
                    return Err(Error::Server {
                        code: err.code,
                        message: err.message,
                    });
                }
                Ok(response.result.unwrap_or(Value::Null))
            }
            // The sender was dropped by a sweep: shutdown or transport loss.
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                // Deadline won the race; a late response finds no slot and
                // is dropped by the reader.
                lock(&self.requests).pending.remove(&id);
                Err(Error::Timeout { method })
            }
        }
    }

    fn raw_notify(&self, method: &'static str, params: Option<Value>) -> Result<(), Error> {
        self.admit(method)?;
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| Error::Protocol(format!("serializing notification: {e}")))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .map_err(|_| Error::Cancelled)
    }

    /// Route one inbound frame. Runs on the reader task; must stay O(1)
    /// and must never block.
    fn dispatch_frame(
        frame: &Value,
        requests: &Mutex<RequestTable>,
        ready: &Mutex<ReadyState>,
        writer_tx: &mpsc::UnboundedSender<WriterCommand>,
    ) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::debug!("dropping malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, response } => {
                let slot = lock(requests).pending.remove(&id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!("dropping response for unknown request id {id}"),
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // clangd sends window/workDoneProgress/create and friends;
                // it must get an answer or it may stall.
                tracing::debug!("server request {method}, answering method-not-found");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("method not found: {method}")
                    }
                });
                let _ = writer_tx.send(WriterCommand::Send(reply));
            }
            IncomingFrame::Notification { method, params } => {
                Self::handle_notification(&method, params, ready);
            }
        }
    }

    fn handle_notification(method: &str, params: Option<Value>, ready: &Mutex<ReadyState>) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = params else { return };
                let parsed: PublishDiagnosticsParams = match serde_json::from_value(params) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::debug!("unparseable publishDiagnostics: {e}");
                        return;
                    }
                };
                let Ok(uri) = Url::parse(&parsed.uri) else {
                    tracing::debug!("publishDiagnostics with invalid URI {:?}", parsed.uri);
                    return;
                };
                let mut state = lock(ready);
                state.ready_files.insert(uri.clone());
                if let Some(waiter) = state.waiters.get(&uri) {
                    waiter.notify_waiters();
                }
            }
            "$/progress" => {
                let Some(params) = params else { return };
                let parsed: ProgressParams = match serde_json::from_value(params) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::debug!("unparseable $/progress: {e}");
                        return;
                    }
                };
                let mut state = lock(ready);
                match parsed.value.kind.as_str() {
                    "begin" => {
                        let title = parsed.value.title.unwrap_or_default().to_lowercase();
                        if title.contains("index") || title.contains("background") {
                            state.indexing_token = Some(parsed.token);
                            state.indexing = IndexingStatus {
                                in_progress: true,
                                percentage: parsed.value.percentage,
                                message: parsed.value.message.unwrap_or_default(),
                            };
                        }
                    }
                    "report" if state.indexing_token.as_ref() == Some(&parsed.token) => {
                        if parsed.value.percentage.is_some() {
                            state.indexing.percentage = parsed.value.percentage;
                        }
                        if let Some(message) = parsed.value.message {
                            state.indexing.message = message;
                        }
                    }
                    "end" if state.indexing_token.as_ref() == Some(&parsed.token) => {
                        state.indexing_token = None;
                        state.indexing = IndexingStatus {
                            in_progress: false,
                            percentage: None,
                            message: parsed.value.message.unwrap_or_default(),
                        };
                    }
                    _ => {}
                }
            }
            "window/logMessage" | "window/showMessage" => {
                tracing::trace!("server message notification: {method}");
            }
            other => {
                tracing::trace!("ignoring notification: {other}");
            }
        }
    }
}

fn shutting_down(state: &AtomicU8) -> bool {
    matches!(
        ClientState::from_u8(state.load(Ordering::SeqCst)),
        ClientState::ShuttingDown | ClientState::Closed
    )
}

/// Fail every pending slot and mark the client `Failed`. Holding the table
/// lock while storing the state makes the sweep atomic with respect to new
/// request admission.
fn fatal_sweep(state: &AtomicU8, requests: &Mutex<RequestTable>) {
    let mut table = lock(requests);
    state.store(ClientState::Failed as u8, Ordering::SeqCst);
    table.pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// The far side of a duplex transport, scripted by each test.
    struct ScriptedServer {
        reader: FrameReader<DuplexStream>,
        writer: FrameWriter<DuplexStream>,
    }

    impl ScriptedServer {
        /// Read the next request frame, asserting its method.
        async fn expect_request(&mut self, method: &str) -> (Value, Value) {
            loop {
                let frame = self
                    .reader
                    .read_frame()
                    .await
                    .expect("transport error")
                    .expect("unexpected EOF");
                // Skip notifications the client emits along the way.
                if frame.get("id").is_none() {
                    continue;
                }
                assert_eq!(frame["method"], method, "unexpected method in {frame}");
                return (frame["id"].clone(), frame["params"].clone());
            }
        }

        async fn expect_notification(&mut self, method: &str) -> Value {
            let frame = self
                .reader
                .read_frame()
                .await
                .expect("transport error")
                .expect("unexpected EOF");
            assert_eq!(frame["method"], method, "unexpected method in {frame}");
            frame["params"].clone()
        }

        async fn respond(&mut self, id: &Value, result: Value) {
            self.writer
                .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
                .await
                .expect("write failed");
        }

        async fn notify(&mut self, method: &str, params: Value) {
            self.writer
                .write_frame(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
                .await
                .expect("write failed");
        }
    }

    fn test_root() -> Url {
        Url::parse("file:///proj").expect("valid url")
    }

    fn test_uri(name: &str) -> Url {
        Url::parse(&format!("file:///proj/{name}")).expect("valid url")
    }

    /// Build a `Ready` client plus its scripted far side.
    async fn ready_pair(timeout: Duration) -> (LspClient, ScriptedServer) {
        let (client_rx, server_tx) = tokio::io::duplex(256 * 1024);
        let (server_rx, client_tx) = tokio::io::duplex(256 * 1024);
        let mut server = ScriptedServer {
            reader: FrameReader::new(server_rx),
            writer: FrameWriter::new(server_tx),
        };

        let handshake = async {
            let (id, params) = server.expect_request("initialize").await;
            assert_eq!(params["capabilities"]["window"]["workDoneProgress"], true);
            server.respond(&id, json!({"capabilities": {}})).await;
            server.expect_notification("initialized").await;
            server
        };

        let (client, server) = tokio::join!(
            LspClient::attach(test_root(), timeout, client_rx, client_tx),
            handshake
        );
        (client.expect("attach failed"), server)
    }

    async fn open_doc(client: &LspClient, server: &mut ScriptedServer, name: &str) -> Url {
        let uri = test_uri(name);
        client.open(&uri, "int main() {}\n", "cpp").await.expect("open failed");
        let params = server.expect_notification("textDocument/didOpen").await;
        assert_eq!(params["textDocument"]["uri"], uri.as_str());
        uri
    }

    #[tokio::test]
    async fn handshake_reaches_ready() {
        let (client, _server) = ready_pair(Duration::from_secs(5)).await;
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.open_files_count(), 0);
    }

    #[tokio::test]
    async fn request_ids_strictly_increase() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        let uri = open_doc(&client, &mut server, "a.cpp").await;

        for expected_id in 2..5u64 {
            let query = client.definition(&uri, 0, 0);
            let serve = async {
                let (id, _) = server.expect_request("textDocument/definition").await;
                assert_eq!(id, json!(expected_id), "ids must increase monotonically");
                server.respond(&id, json!([])).await;
            };
            let (result, ()) = tokio::join!(query, serve);
            assert!(result.expect("definition failed").is_empty());
        }
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        let uri = open_doc(&client, &mut server, "a.cpp").await;

        let location = |line: u32| {
            json!([{
                "uri": "file:///proj/a.cpp",
                "range": { "start": { "line": line, "character": 0 }, "end": { "line": line, "character": 1 } }
            }])
        };

        let q1 = client.definition(&uri, 1, 0);
        let q2 = client.references(&uri, 2, 0, true);
        let q3 = client.implementation(&uri, 3, 0);
        let serve = async {
            let (id1, _) = server.expect_request("textDocument/definition").await;
            let (id2, _) = server.expect_request("textDocument/references").await;
            let (id3, _) = server.expect_request("textDocument/implementation").await;
            // Respond in reverse order of arrival.
            server.respond(&id3, location(30)).await;
            server.respond(&id1, location(10)).await;
            server.respond(&id2, location(20)).await;
        };

        let (r1, r2, r3, ()) = tokio::join!(q1, q2, q3, serve);
        assert_eq!(r1.expect("definition")[0].line, 11);
        assert_eq!(r2.expect("references")[0].line, 21);
        assert_eq!(r3.expect("implementation")[0].line, 31);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn timeout_removes_slot_and_late_response_is_dropped() {
        let (client, mut server) = ready_pair(Duration::from_millis(100)).await;
        let uri = open_doc(&client, &mut server, "a.cpp").await;

        let query = client.definition(&uri, 0, 0);
        let serve = async { server.expect_request("textDocument/definition").await };
        let (result, (id, _)) = tokio::join!(query, serve);
        assert!(matches!(
            result,
            Err(Error::Timeout { method: "textDocument/definition" })
        ));
        assert_eq!(client.pending_count(), 0);

        // The late response must be dropped without completing anything.
        server.respond(&id, json!([])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(), ClientState::Ready);

        // The client still works afterwards.
        let query = client.hover(&uri, 0, 0);
        let serve = async {
            let (id, _) = server.expect_request("textDocument/hover").await;
            server.respond(&id, json!({"contents": "int main()"})).await;
        };
        let (hover, ()) = tokio::join!(query, serve);
        assert_eq!(hover.expect("hover"), Some("int main()".to_string()));
    }

    #[tokio::test]
    async fn server_error_response_maps_to_server_error() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        let uri = open_doc(&client, &mut server, "a.cpp").await;

        let query = client.definition(&uri, 0, 0);
        let serve = async {
            let (id, _) = server.expect_request("textDocument/definition").await;
            server
                .writer
                .write_frame(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32001, "message": "not indexed" }
                }))
                .await
                .expect("write failed");
        };
        let (result, ()) = tokio::join!(query, serve);
        match result {
            Err(Error::Server { code, message }) => {
                assert_eq!(code, -32001);
                assert_eq!(message, "not indexed");
            }
            other => panic!("expected server error, got {other:?}"),
        }
        // Per-operation error: client stays ready.
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn open_close_enforce_document_state() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        let uri = open_doc(&client, &mut server, "a.cpp").await;

        assert!(matches!(
            client.open(&uri, "", "cpp").await,
            Err(Error::AlreadyOpen(_))
        ));

        client.close(&uri).await.expect("close failed");
        server.expect_notification("textDocument/didClose").await;
        assert_eq!(client.open_files_count(), 0);

        assert!(matches!(client.close(&uri).await, Err(Error::NotOpen(_))));

        let unopened = test_uri("never.cpp");
        assert!(matches!(
            client.definition(&unopened, 0, 0).await,
            Err(Error::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn diagnostics_signal_waiters_and_persist() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        let uri = test_uri("a.cpp");

        let wait = client.wait_for_file(&uri, Duration::from_secs(5));
        let publish = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server
                .notify(
                    "textDocument/publishDiagnostics",
                    json!({"uri": uri.as_str(), "diagnostics": []}),
                )
                .await;
        };
        let (ready, ()) = tokio::join!(wait, publish);
        assert!(ready.expect("wait_for_file failed"));

        // Second wait observes the retained readiness edge immediately.
        assert!(client
            .wait_for_file(&uri, Duration::from_millis(1))
            .await
            .expect("wait_for_file failed"));
        assert!(client.is_file_ready(&uri));
    }

    #[tokio::test]
    async fn wait_for_file_times_out_without_diagnostics() {
        let (client, _server) = ready_pair(Duration::from_secs(5)).await;
        let uri = test_uri("quiet.cpp");
        let ready = client
            .wait_for_file(&uri, Duration::from_millis(50))
            .await
            .expect("wait_for_file failed");
        assert!(!ready);
    }

    #[tokio::test]
    async fn progress_notifications_drive_indexing_status() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        assert_eq!(client.indexing_status().label(), "idle");

        server
            .notify(
                "$/progress",
                json!({"token": "backgroundIndexProgress", "value": {"kind": "begin", "title": "indexing"}}),
            )
            .await;
        // An unrelated progress stream must not disturb the rollup.
        server
            .notify(
                "$/progress",
                json!({"token": "other", "value": {"kind": "begin", "title": "loading"}}),
            )
            .await;
        server
            .notify(
                "$/progress",
                json!({"token": "other", "value": {"kind": "report", "percentage": 99}}),
            )
            .await;

        // Synchronise on the reader having processed everything above.
        let uri = test_uri("sync.cpp");
        server
            .notify(
                "textDocument/publishDiagnostics",
                json!({"uri": uri.as_str(), "diagnostics": []}),
            )
            .await;
        assert!(client.wait_for_file(&uri, Duration::from_secs(5)).await.expect("wait"));

        assert!(client.is_indexing());
        assert_eq!(client.indexing_status().label(), "indexing");

        server
            .notify(
                "$/progress",
                json!({"token": "backgroundIndexProgress", "value": {"kind": "report", "percentage": 42, "message": "12/29"}}),
            )
            .await;
        let uri2 = test_uri("sync2.cpp");
        server
            .notify(
                "textDocument/publishDiagnostics",
                json!({"uri": uri2.as_str(), "diagnostics": []}),
            )
            .await;
        assert!(client.wait_for_file(&uri2, Duration::from_secs(5)).await.expect("wait"));

        let status = client.indexing_status();
        assert_eq!(status.label(), "indexing (42%)");
        assert_eq!(status.message, "12/29");

        server
            .notify(
                "$/progress",
                json!({"token": "backgroundIndexProgress", "value": {"kind": "end"}}),
            )
            .await;
        let uri3 = test_uri("sync3.cpp");
        server
            .notify(
                "textDocument/publishDiagnostics",
                json!({"uri": uri3.as_str(), "diagnostics": []}),
            )
            .await;
        assert!(client.wait_for_file(&uri3, Duration::from_secs(5)).await.expect("wait"));

        let status = client.indexing_status();
        assert!(!status.in_progress);
        assert_eq!(status.percentage, None);
        assert_eq!(status.label(), "idle");
    }

    #[tokio::test]
    async fn server_request_gets_method_not_found_reply() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        server
            .writer
            .write_frame(&json!({
                "jsonrpc": "2.0",
                "id": 99,
                "method": "window/workDoneProgress/create",
                "params": { "token": "t" }
            }))
            .await
            .expect("write failed");

        let frame = server
            .reader
            .read_frame()
            .await
            .expect("transport error")
            .expect("unexpected EOF");
        assert_eq!(frame["id"], 99);
        assert_eq!(frame["error"]["code"], -32601);
        let _ = client;
    }

    #[tokio::test]
    async fn transport_eof_sweeps_pending_and_fails_client() {
        let (client, server) = ready_pair(Duration::from_secs(5)).await;
        let uri = test_uri("a.cpp");
        client.open(&uri, "", "cpp").await.expect("open failed");

        let query = client.definition(&uri, 0, 0);
        let drop_server = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(server);
        };
        let (result, ()) = tokio::join!(query, drop_server);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(), ClientState::Failed);

        // Every operation now refuses with NotReady.
        assert!(matches!(
            client.workspace_symbol("x").await,
            Err(Error::NotReady(ClientState::Failed))
        ));
        assert!(matches!(
            client.wait_for_file(&uri, Duration::from_millis(1)).await,
            Err(Error::NotReady(ClientState::Failed))
        ));
    }

    #[tokio::test]
    async fn shutdown_closes_client_and_empties_pending() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;

        let teardown = client.shutdown();
        let serve = async {
            let (id, _) = server.expect_request("shutdown").await;
            server.respond(&id, Value::Null).await;
            server.expect_notification("exit").await;
        };
        let (result, ()) = tokio::join!(teardown, serve);
        result.expect("shutdown failed");

        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(client.pending_count(), 0);
        assert!(matches!(
            client.workspace_symbol("x").await,
            Err(Error::NotReady(ClientState::Closed))
        ));

        // Idempotent.
        client.shutdown().await.expect("second shutdown failed");
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn spurious_response_does_not_complete_anything() {
        let (client, mut server) = ready_pair(Duration::from_secs(5)).await;
        server
            .writer
            .write_frame(&json!({"jsonrpc": "2.0", "id": 4242, "result": {}}))
            .await
            .expect("write failed");

        // Client keeps running and serving requests.
        let query = client.workspace_symbol("");
        let serve = async {
            let (id, params) = server.expect_request("workspace/symbol").await;
            assert_eq!(params["query"], "");
            server.respond(&id, json!([])).await;
        };
        let (result, ()) = tokio::join!(query, serve);
        assert!(result.expect("workspace_symbol failed").is_empty());
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn failed_handshake_surfaces_server_error() {
        let (client_rx, server_tx) = tokio::io::duplex(64 * 1024);
        let (server_rx, client_tx) = tokio::io::duplex(64 * 1024);
        let mut server = ScriptedServer {
            reader: FrameReader::new(server_rx),
            writer: FrameWriter::new(server_tx),
        };

        let attach = LspClient::attach(test_root(), Duration::from_secs(5), client_rx, client_tx);
        let serve = async {
            let (id, _) = server.expect_request("initialize").await;
            server
                .writer
                .write_frame(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32002, "message": "server not ready" }
                }))
                .await
                .expect("write failed");
        };
        let (result, ()) = tokio::join!(attach, serve);
        assert!(matches!(result, Err(Error::Server { code: -32002, .. })));
    }
}
