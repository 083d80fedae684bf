//! A scripted stand-in language server for integration tests.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout, far enough to
//! exercise the client runtime: initialize/shutdown lifecycle, diagnostics
//! on didOpen, an optional indexing progress sequence, and word-matching
//! definition/references/hover/symbol answers computed from opened
//! document text. Plain std I/O and threads; the point is to be boringly
//! deterministic.
//!
//! Flags:
//!   --diagnostics-delay-ms <n>   delay before publishing diagnostics
//!   --no-diagnostics             never publish diagnostics
//!   --indexing-ms <n>            emit an indexing progress begin/report/end
//!   --hang-on <method>           never respond to this method (repeatable)
//!   --fail-on <method>           respond with an error (repeatable)

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};

#[derive(Default)]
struct Flags {
    diagnostics_delay_ms: u64,
    no_diagnostics: bool,
    indexing_ms: Option<u64>,
    hang_on: Vec<String>,
    fail_on: Vec<String>,
}

fn parse_flags() -> Flags {
    let mut flags = Flags::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--diagnostics-delay-ms" => {
                flags.diagnostics_delay_ms = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
            }
            "--no-diagnostics" => flags.no_diagnostics = true,
            "--indexing-ms" => {
                flags.indexing_ms = args.next().and_then(|v| v.parse().ok());
            }
            "--hang-on" => flags.hang_on.extend(args.next()),
            "--fail-on" => flags.fail_on.extend(args.next()),
            other => {
                eprintln!("stubls: unknown flag {other}");
                std::process::exit(2);
            }
        }
    }
    flags
}

type Writer = Arc<Mutex<std::io::Stdout>>;

fn lock(writer: &Writer) -> MutexGuard<'_, std::io::Stdout> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send(writer: &Writer, value: &Value) {
    let body = value.to_string();
    let mut out = lock(writer);
    let _ = write!(out, "Content-Length: {}\r\n\r\n{}", body.len(), body);
    let _ = out.flush();
}

fn respond(writer: &Writer, id: &Value, result: Value) {
    send(writer, &json!({"jsonrpc": "2.0", "id": id, "result": result}));
}

fn respond_error(writer: &Writer, id: &Value, code: i64, message: &str) {
    send(
        writer,
        &json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}),
    );
}

struct Stubls {
    flags: Flags,
    writer: Writer,
    documents: HashMap<String, String>,
}

impl Stubls {
    fn run(&mut self) {
        let mut stdin = std::io::stdin().lock();
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 8192];

        loop {
            match stdin.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
            while let Some((message, consumed)) = next_frame(&buffer) {
                buffer.drain(..consumed);
                if let Ok(value) = serde_json::from_str::<Value>(&message) {
                    self.handle(&value);
                }
            }
        }
    }

    fn handle(&mut self, message: &Value) {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        match message.get("id") {
            Some(id) => self.handle_request(method, id.clone(), &message["params"]),
            None => self.handle_notification(method, &message["params"]),
        }
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        if self.flags.hang_on.iter().any(|m| m == method) {
            return;
        }
        if self.flags.fail_on.iter().any(|m| m == method) {
            respond_error(&self.writer, &id, -32603, "stubls: configured to fail");
            return;
        }

        match method {
            "initialize" => respond(
                &self.writer,
                &id,
                json!({
                    "capabilities": {
                        "textDocumentSync": { "openClose": true, "change": 1 },
                        "definitionProvider": true,
                        "referencesProvider": true,
                        "hoverProvider": true,
                        "documentSymbolProvider": true,
                        "workspaceSymbolProvider": true,
                        "implementationProvider": true,
                        "callHierarchyProvider": true
                    }
                }),
            ),
            "shutdown" => respond(&self.writer, &id, Value::Null),
            "textDocument/definition" => {
                let result = self.definition(params).unwrap_or(Value::Null);
                respond(&self.writer, &id, result);
            }
            "textDocument/references" => {
                let result = self.references(params).unwrap_or_else(|| json!([]));
                respond(&self.writer, &id, result);
            }
            "textDocument/hover" => {
                let result = self
                    .word_at(params)
                    .map(|w| json!({"contents": {"kind": "markdown", "value": format!("`{w}`")}}))
                    .unwrap_or(Value::Null);
                respond(&self.writer, &id, result);
            }
            "textDocument/documentSymbol" => {
                let uri = params["textDocument"]["uri"].as_str().unwrap_or("");
                let symbols = self
                    .documents
                    .get(uri)
                    .map(|text| symbols_in(text))
                    .unwrap_or_default();
                respond(&self.writer, &id, Value::Array(symbols));
            }
            "workspace/symbol" => {
                let query = params["query"].as_str().unwrap_or("");
                let mut matches = Vec::new();
                for (uri, text) in &self.documents {
                    for sym in symbols_in(text) {
                        let name = sym["name"].as_str().unwrap_or("");
                        if query.is_empty() || name.contains(query) {
                            matches.push(json!({
                                "name": name,
                                "kind": sym["kind"],
                                "location": { "uri": uri, "range": sym["selectionRange"] }
                            }));
                        }
                    }
                }
                respond(&self.writer, &id, Value::Array(matches));
            }
            "textDocument/implementation" => {
                // stubls has no index; always empty, like clangd before
                // background indexing completes.
                respond(&self.writer, &id, json!([]));
            }
            "textDocument/prepareCallHierarchy" => {
                let result = self
                    .word_at(params)
                    .map(|word| {
                        let uri = params["textDocument"]["uri"].as_str().unwrap_or("");
                        json!([{
                            "name": word,
                            "kind": 12,
                            "uri": uri,
                            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 0 } },
                            "selectionRange": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 0 } }
                        }])
                    })
                    .unwrap_or(Value::Null);
                respond(&self.writer, &id, result);
            }
            "callHierarchy/incomingCalls" | "callHierarchy/outgoingCalls" => {
                respond(&self.writer, &id, json!([]));
            }
            other => respond_error(
                &self.writer,
                &id,
                -32601,
                &format!("stubls: method not found: {other}"),
            ),
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if let Some(ms) = self.flags.indexing_ms {
                    spawn_indexing(self.writer.clone(), ms);
                }
            }
            "textDocument/didOpen" => {
                let doc = &params["textDocument"];
                let uri = doc["uri"].as_str().unwrap_or("").to_string();
                let text = doc["text"].as_str().unwrap_or("").to_string();
                self.documents.insert(uri.clone(), text);
                if !self.flags.no_diagnostics {
                    publish_diagnostics(self.writer.clone(), uri, self.flags.diagnostics_delay_ms);
                }
            }
            "textDocument/didClose" => {
                let uri = params["textDocument"]["uri"].as_str().unwrap_or("");
                self.documents.remove(uri);
            }
            "exit" => std::process::exit(0),
            _ => {}
        }
    }

    fn word_at(&self, params: &Value) -> Option<String> {
        let uri = params["textDocument"]["uri"].as_str()?;
        let line = params["position"]["line"].as_u64()? as usize;
        let character = params["position"]["character"].as_u64()? as usize;
        let text = self.documents.get(uri)?;
        word_at_position(text, line, character)
    }

    fn definition(&self, params: &Value) -> Option<Value> {
        let uri = params["textDocument"]["uri"].as_str()?;
        let word = self.word_at(params)?;
        let text = self.documents.get(uri)?;
        // First occurrence is the "definition".
        for (line_idx, line) in text.lines().enumerate() {
            if let Some(col) = line.find(&word) {
                return Some(json!([{
                    "uri": uri,
                    "range": {
                        "start": { "line": line_idx, "character": col },
                        "end": { "line": line_idx, "character": col + word.len() }
                    }
                }]));
            }
        }
        None
    }

    fn references(&self, params: &Value) -> Option<Value> {
        let uri = params["textDocument"]["uri"].as_str()?;
        let word = self.word_at(params)?;
        let text = self.documents.get(uri)?;
        let mut locations = Vec::new();
        for (line_idx, line) in text.lines().enumerate() {
            let mut start = 0;
            while let Some(pos) = line[start..].find(&word) {
                let col = start + pos;
                locations.push(json!({
                    "uri": uri,
                    "range": {
                        "start": { "line": line_idx, "character": col },
                        "end": { "line": line_idx, "character": col + word.len() }
                    }
                }));
                start = col + word.len();
            }
        }
        Some(Value::Array(locations))
    }
}

fn publish_diagnostics(writer: Writer, uri: String, delay_ms: u64) {
    let publish = move || {
        send(
            &writer,
            &json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {
                    "uri": uri,
                    "diagnostics": [{
                        "range": {
                            "start": { "line": 0, "character": 0 },
                            "end": { "line": 0, "character": 1 }
                        },
                        "severity": 2,
                        "source": "stubls",
                        "message": "stubls placeholder diagnostic"
                    }]
                }
            }),
        );
    };
    if delay_ms > 0 {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay_ms));
            publish();
        });
    } else {
        publish();
    }
}

fn spawn_indexing(writer: Writer, ms: u64) {
    std::thread::spawn(move || {
        let token = "stubls-indexing";
        send(
            &writer,
            &json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": { "token": token, "value": { "kind": "begin", "title": "indexing" } }
            }),
        );
        std::thread::sleep(Duration::from_millis(ms / 2));
        send(
            &writer,
            &json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": { "token": token, "value": { "kind": "report", "percentage": 50 } }
            }),
        );
        std::thread::sleep(Duration::from_millis(ms / 2));
        send(
            &writer,
            &json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": { "token": token, "value": { "kind": "end" } }
            }),
        );
    });
}

/// Parse one framed message from the front of `buffer`, returning the body
/// and the number of bytes consumed.
fn next_frame(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length = None;
    for line in headers.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;
    if buffer.len() < total {
        return None;
    }
    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

fn word_at_position(text: &str, line: usize, character: usize) -> Option<String> {
    let line_text = text.lines().nth(line)?;
    let bytes = line_text.as_bytes();
    if character >= bytes.len() {
        return None;
    }

    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    if !is_word(bytes[character]) {
        return None;
    }
    let start = (0..=character)
        .rev()
        .find(|&i| !is_word(bytes[i]))
        .map_or(0, |i| i + 1);
    let end = (character..bytes.len())
        .find(|&i| !is_word(bytes[i]))
        .unwrap_or(bytes.len());
    Some(line_text[start..end].to_string())
}

/// Lines shaped like definitions become symbols: `struct X`, `class X`,
/// `void x(`, plus anything matching `type name(`.
fn symbols_in(text: &str) -> Vec<Value> {
    let mut symbols = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        let (kind, name) = if let Some(rest) = trimmed.strip_prefix("struct ") {
            (23, identifier_prefix(rest))
        } else if let Some(rest) = trimmed.strip_prefix("class ") {
            (5, identifier_prefix(rest))
        } else if let Some(rest) = trimmed.strip_prefix("void ") {
            (12, identifier_prefix(rest))
        } else if let Some(rest) = trimmed.strip_prefix("int ") {
            (13, identifier_prefix(rest))
        } else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let indent = line.len() - trimmed.len();
        let keyword_len = trimmed.len() - trimmed.split_once(' ').map_or(0, |(_, r)| r.len());
        let col = indent + keyword_len;
        symbols.push(json!({
            "name": name,
            "kind": kind,
            "range": {
                "start": { "line": line_idx, "character": indent },
                "end": { "line": line_idx, "character": line.len() }
            },
            "selectionRange": {
                "start": { "line": line_idx, "character": col },
                "end": { "line": line_idx, "character": col + name.len() }
            }
        }));
    }
    symbols
}

fn identifier_prefix(text: &str) -> String {
    text.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn main() {
    let flags = parse_flags();
    let mut server = Stubls {
        flags,
        writer: Arc::new(Mutex::new(std::io::stdout())),
        documents: HashMap::new(),
    };
    server.run();
}
