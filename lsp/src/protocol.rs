//! Internal LSP message shapes: serde types, param builders and result
//! normalizers.
//!
//! Everything the wire needs is built here so the client deals only in
//! `serde_json::Value` frames and the rest of the crate deals only in the
//! normalized types from [`crate::types`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::error::Error;
use crate::types::{CallEntry, CallSite, Location, SymbolInfo, symbol_kind_label};

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A response delivered to a pending request slot.
#[derive(Debug)]
pub(crate) struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

/// Classified inbound frame.
pub(crate) enum IncomingFrame {
    Response { id: u64, response: RpcResponse },
    ServerRequest { id: Value, method: String },
    Notification { method: String, params: Option<Value> },
}

/// Classify a decoded frame. Returns `None` for shapes that fit none of
/// the three JSON-RPC message kinds.
pub(crate) fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(IncomingFrame::Response {
            id: id_val.as_u64()?,
            response: RpcResponse {
                result: frame.get("result").cloned(),
                error: frame
                    .get("error")
                    .cloned()
                    .and_then(|e| serde_json::from_value(e).ok()),
            },
        }),
        (Some(id_val), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressParams {
    pub token: Value,
    pub value: ProgressValue,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressValue {
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub percentage: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

// ── param builders ─────────────────────────────────────────────────────

pub(crate) fn initialize_params(root_uri: &Url) -> Value {
    json!({
        "processId": std::process::id(),
        "rootUri": root_uri.as_str(),
        "capabilities": {
            "textDocument": {
                "hover": { "contentFormat": ["plaintext", "markdown"] },
                "definition": { "linkSupport": true },
                "references": {},
                "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
                "implementation": { "linkSupport": true },
                "callHierarchy": {},
                "publishDiagnostics": { "relatedInformation": false }
            },
            "workspace": {
                "symbol": {}
            },
            "window": {
                "workDoneProgress": true
            }
        },
        "workspaceFolders": [{
            "uri": root_uri.as_str(),
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(uri: &Url, language_id: &str, text: &str) -> Value {
    json!({
        "textDocument": {
            "uri": uri.as_str(),
            "languageId": language_id,
            "version": 1,
            "text": text
        }
    })
}

pub(crate) fn did_close_params(uri: &Url) -> Value {
    json!({
        "textDocument": { "uri": uri.as_str() }
    })
}

pub(crate) fn position_params(uri: &Url, line: u32, character: u32) -> Value {
    json!({
        "textDocument": { "uri": uri.as_str() },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn reference_params(
    uri: &Url,
    line: u32,
    character: u32,
    include_declaration: bool,
) -> Value {
    json!({
        "textDocument": { "uri": uri.as_str() },
        "position": { "line": line, "character": character },
        "context": { "includeDeclaration": include_declaration }
    })
}

pub(crate) fn document_symbol_params(uri: &Url) -> Value {
    json!({
        "textDocument": { "uri": uri.as_str() }
    })
}

pub(crate) fn workspace_symbol_params(query: &str) -> Value {
    json!({ "query": query })
}

pub(crate) fn call_hierarchy_params(item: &Value) -> Value {
    json!({ "item": item })
}

// ── URI conversion ─────────────────────────────────────────────────────

pub(crate) fn path_to_uri(path: &Path) -> Result<Url, Error> {
    Url::from_file_path(path).map_err(|()| Error::InvalidPath(path.to_path_buf()))
}

/// Best-effort conversion back to a path. Non-`file://` URIs fall back to
/// the raw string so results remain printable.
pub(crate) fn uri_to_path(uri: &str) -> PathBuf {
    Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(uri))
}

// ── result normalizers ─────────────────────────────────────────────────

/// Flatten a definition/references/implementation result into locations.
///
/// Accepts `null`, a single `Location`, an array of `Location`s, or an
/// array of `LocationLink`s (clangd sends links when `linkSupport` was
/// declared). Output positions are 1-based.
pub(crate) fn normalize_locations(result: &Value) -> Vec<Location> {
    let items: Vec<&Value> = match result {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|loc| {
            let uri = loc
                .get("uri")
                .or_else(|| loc.get("targetUri"))?
                .as_str()?;
            let range = loc
                .get("range")
                .or_else(|| loc.get("targetSelectionRange"))
                .or_else(|| loc.get("targetRange"))?;
            let start = range.get("start")?;
            Some(Location {
                file: uri_to_path(uri),
                line: position_field(start, "line") + 1,
                column: position_field(start, "character") + 1,
            })
        })
        .collect()
}

/// Extract readable text from a hover result's `contents`, which may be a
/// plain string, a `MarkedString` object, a markup object, or an array of
/// any of these.
pub(crate) fn extract_hover(result: &Value) -> Option<String> {
    let contents = result.get("contents")?;
    let text = hover_contents_text(contents);
    if text.is_empty() { None } else { Some(text) }
}

fn hover_contents_text(contents: &Value) -> String {
    match contents {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        Value::Array(items) => items
            .iter()
            .map(hover_contents_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Normalize a symbol result, handling both hierarchical `DocumentSymbol`
/// (has `selectionRange`, children, no URI) and flat `SymbolInformation`
/// (has `location`).
pub(crate) fn normalize_symbols(result: &Value) -> Vec<SymbolInfo> {
    let Value::Array(items) = result else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|sym| {
            let name = sym.get("name").and_then(|n| n.as_str())?.to_string();
            let kind =
                symbol_kind_label(sym.get("kind").and_then(|k| k.as_u64()).unwrap_or(0)).to_string();

            if let Some(selection) = sym.get("selectionRange") {
                let start = selection.get("start")?;
                Some(SymbolInfo {
                    name,
                    kind,
                    file: None,
                    line: position_field(start, "line") + 1,
                    column: position_field(start, "character") + 1,
                    children: normalize_symbols(sym.get("children").unwrap_or(&Value::Null)),
                })
            } else if let Some(location) = sym.get("location") {
                let uri = location.get("uri").and_then(|u| u.as_str())?;
                let start = location.get("range")?.get("start")?;
                Some(SymbolInfo {
                    name,
                    kind,
                    file: Some(uri_to_path(uri)),
                    line: position_field(start, "line") + 1,
                    column: position_field(start, "character") + 1,
                    children: Vec::new(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Normalize a call-hierarchy result. `direction` is `"from"` for incoming
/// calls and `"to"` for outgoing calls; `fromRanges` carries the call
/// sites in both directions.
pub(crate) fn normalize_calls(result: &Value, direction: &str) -> Vec<CallEntry> {
    let Value::Array(items) = result else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let target = item.get(direction)?;
            let start = target.get("selectionRange").and_then(|r| r.get("start"));
            let call_sites = item
                .get("fromRanges")
                .and_then(|r| r.as_array())
                .map(|ranges| {
                    ranges
                        .iter()
                        .filter_map(|r| r.get("start"))
                        .map(|s| CallSite {
                            line: position_field(s, "line") + 1,
                            column: position_field(s, "character") + 1,
                        })
                        .collect()
                })
                .unwrap_or_default();

            Some(CallEntry {
                name: target
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string(),
                kind: symbol_kind_label(target.get("kind").and_then(|k| k.as_u64()).unwrap_or(0))
                    .to_string(),
                file: uri_to_path(target.get("uri").and_then(|u| u.as_str()).unwrap_or("")),
                line: start.map_or(1, |s| position_field(s, "line") + 1),
                column: start.map_or(1, |s| position_field(s, "character") + 1),
                call_sites,
            })
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn position_field(position: &Value, field: &str) -> u32 {
    position.get(field).and_then(|v| v.as_u64()).unwrap_or(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_with_params() {
        let req = Request::new(3, "workspace/symbol", Some(json!({"query": "Widget"})));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 3);
        assert_eq!(value["method"], "workspace/symbol");
        assert_eq!(value["params"]["query"], "Widget");
    }

    #[test]
    fn request_omits_absent_params() {
        let req = Request::new(1, "shutdown", None);
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("params").is_none(), "params must be omitted, not null");
    }

    #[test]
    fn notification_has_no_id() {
        let notif = Notification::new("exit", None);
        let value = serde_json::to_value(&notif).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn initialize_params_declare_work_done_progress() {
        let root = Url::parse("file:///workspace").unwrap();
        let params = initialize_params(&root);
        assert_eq!(params["rootUri"], "file:///workspace");
        assert_eq!(params["capabilities"]["window"]["workDoneProgress"], true);
        assert_eq!(
            params["capabilities"]["textDocument"]["documentSymbol"]
                ["hierarchicalDocumentSymbolSupport"],
            true
        );
        assert!(params["processId"].is_number());
    }

    #[test]
    fn did_open_params_carry_full_text() {
        let uri = Url::parse("file:///src/a.cpp").unwrap();
        let params = did_open_params(&uri, "cpp", "int main() {}\n");
        assert_eq!(params["textDocument"]["uri"], "file:///src/a.cpp");
        assert_eq!(params["textDocument"]["languageId"], "cpp");
        assert_eq!(params["textDocument"]["version"], 1);
        assert_eq!(params["textDocument"]["text"], "int main() {}\n");
    }

    #[test]
    fn reference_params_include_declaration_flag() {
        let uri = Url::parse("file:///src/a.cpp").unwrap();
        let params = reference_params(&uri, 9, 4, false);
        assert_eq!(params["context"]["includeDeclaration"], false);
        assert_eq!(params["position"]["line"], 9);
        assert_eq!(params["position"]["character"], 4);
    }

    #[test]
    fn parse_incoming_classifies_response() {
        let frame = json!({"jsonrpc": "2.0", "id": 4, "result": []});
        match parse_incoming(&frame) {
            Some(IncomingFrame::Response { id, response }) => {
                assert_eq!(id, 4);
                assert!(response.error.is_none());
                assert_eq!(response.result, Some(json!([])));
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn parse_incoming_classifies_error_response() {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": { "code": -32600, "message": "invalid request" }
        });
        match parse_incoming(&frame) {
            Some(IncomingFrame::Response { response, .. }) => {
                let err = response.error.unwrap();
                assert_eq!(err.code, -32600);
                assert_eq!(err.message, "invalid request");
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn parse_incoming_classifies_server_request_and_notification() {
        let frame = json!({"jsonrpc": "2.0", "id": 1, "method": "workspace/configuration"});
        assert!(matches!(
            parse_incoming(&frame),
            Some(IncomingFrame::ServerRequest { .. })
        ));

        let frame = json!({"jsonrpc": "2.0", "method": "$/progress", "params": {}});
        assert!(matches!(
            parse_incoming(&frame),
            Some(IncomingFrame::Notification { .. })
        ));
    }

    #[test]
    fn parse_incoming_rejects_shapeless_frames() {
        assert!(parse_incoming(&json!({"jsonrpc": "2.0"})).is_none());
        assert!(parse_incoming(&json!({"id": 1})).is_none());
    }

    #[test]
    fn path_uri_round_trip() {
        let path = PathBuf::from("/home/dev/src/main.cpp");
        let uri = path_to_uri(&path).unwrap();
        assert_eq!(uri.as_str(), "file:///home/dev/src/main.cpp");
        assert_eq!(uri_to_path(uri.as_str()), path);
    }

    #[test]
    fn relative_path_rejected() {
        assert!(matches!(
            path_to_uri(Path::new("relative/main.cpp")),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn normalize_locations_from_plain_locations() {
        let result = json!([{
            "uri": "file:///src/a.cpp",
            "range": { "start": { "line": 10, "character": 4 }, "end": { "line": 10, "character": 9 } }
        }]);
        let locations = normalize_locations(&result);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].file, PathBuf::from("/src/a.cpp"));
        assert_eq!(locations[0].line, 11);
        assert_eq!(locations[0].column, 5);
    }

    #[test]
    fn normalize_locations_from_location_links() {
        let result = json!([{
            "targetUri": "file:///src/b.hpp",
            "targetRange": { "start": { "line": 0, "character": 0 }, "end": { "line": 20, "character": 0 } },
            "targetSelectionRange": { "start": { "line": 2, "character": 6 }, "end": { "line": 2, "character": 12 } }
        }]);
        let locations = normalize_locations(&result);
        assert_eq!(locations.len(), 1);
        // Selection range wins over the enclosing range.
        assert_eq!(locations[0].line, 3);
        assert_eq!(locations[0].column, 7);
    }

    #[test]
    fn normalize_locations_from_single_object_and_null() {
        let single = json!({
            "uri": "file:///src/a.cpp",
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } }
        });
        assert_eq!(normalize_locations(&single).len(), 1);
        assert!(normalize_locations(&Value::Null).is_empty());
    }

    #[test]
    fn extract_hover_handles_all_content_shapes() {
        assert_eq!(
            extract_hover(&json!({"contents": "plain text"})),
            Some("plain text".to_string())
        );
        assert_eq!(
            extract_hover(&json!({"contents": {"kind": "markdown", "value": "**doc**"}})),
            Some("**doc**".to_string())
        );
        assert_eq!(
            extract_hover(&json!({"contents": [
                {"language": "cpp", "value": "int x"},
                "details"
            ]})),
            Some("int x\ndetails".to_string())
        );
        assert_eq!(extract_hover(&json!({"contents": []})), None);
        assert_eq!(extract_hover(&Value::Null), None);
    }

    #[test]
    fn normalize_symbols_hierarchical() {
        let result = json!([{
            "name": "Widget",
            "kind": 5,
            "selectionRange": { "start": { "line": 3, "character": 6 }, "end": { "line": 3, "character": 12 } },
            "children": [{
                "name": "paint",
                "kind": 6,
                "selectionRange": { "start": { "line": 5, "character": 9 }, "end": { "line": 5, "character": 14 } }
            }]
        }]);
        let symbols = normalize_symbols(&result);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "Widget");
        assert_eq!(symbols[0].kind, "Class");
        assert!(symbols[0].file.is_none());
        assert_eq!(symbols[0].line, 4);
        assert_eq!(symbols[0].children.len(), 1);
        assert_eq!(symbols[0].children[0].name, "paint");
        assert_eq!(symbols[0].children[0].kind, "Method");
    }

    #[test]
    fn normalize_symbols_flat() {
        let result = json!([{
            "name": "make_widget",
            "kind": 12,
            "location": {
                "uri": "file:///src/factory.cpp",
                "range": { "start": { "line": 41, "character": 0 }, "end": { "line": 41, "character": 20 } }
            }
        }]);
        let symbols = normalize_symbols(&result);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].file, Some(PathBuf::from("/src/factory.cpp")));
        assert_eq!(symbols[0].line, 42);
        assert!(symbols[0].children.is_empty());
    }

    #[test]
    fn normalize_calls_extracts_call_sites() {
        let result = json!([{
            "from": {
                "name": "main",
                "kind": 12,
                "uri": "file:///src/main.cpp",
                "selectionRange": { "start": { "line": 8, "character": 4 }, "end": { "line": 8, "character": 8 } }
            },
            "fromRanges": [
                { "start": { "line": 12, "character": 10 }, "end": { "line": 12, "character": 16 } },
                { "start": { "line": 15, "character": 2 }, "end": { "line": 15, "character": 8 } }
            ]
        }]);
        let calls = normalize_calls(&result, "from");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "main");
        assert_eq!(calls[0].kind, "Function");
        assert_eq!(calls[0].line, 9);
        assert_eq!(calls[0].call_sites.len(), 2);
        assert_eq!(calls[0].call_sites[0].line, 13);
        assert_eq!(calls[0].call_sites[1].line, 16);

        assert!(normalize_calls(&result, "to").is_empty());
    }
}
