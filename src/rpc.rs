//! JSON-RPC 2.0 tool dispatcher. Reads newline-delimited requests from
//! stdin, routes each to one of the six tools, and always writes back a
//! single response — a tool call never raises out to the transport.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::explorer;
use crate::format::{self, Verbosity};
use crate::kubectl_exec;
use crate::lifecycle::{InitializeArgs, Lifecycle};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    result: ToolResult,
}

#[derive(Debug, Serialize)]
struct ToolResult {
    content: Vec<TextContent>,
}

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

/// `internal_error` responses always carry a diagnostics snapshot (§7); every
/// other error kind renders the same regardless of the active bundle state.
async fn render_error(guard: &Lifecycle, err: &Error, v: Verbosity) -> String {
    if err.kind() == "internal_error" {
        let diagnostics = crate::supervisor::collect_diagnostics(guard.active_bundle()).await;
        format::format_error_with_diagnostics(err, v, Some(&diagnostics))
    } else {
        format::format_error(err, v)
    }
}

fn ok_result(text: String) -> ToolResult {
    ToolResult {
        content: vec![TextContent { kind: "text", text }],
    }
}

fn verbosity_from_params(params: &Value, default: Verbosity) -> Verbosity {
    params
        .get("verbosity")
        .and_then(Value::as_str)
        .and_then(Verbosity::parse)
        .unwrap_or(default)
}

/// Run the dispatcher loop to completion (stdin EOF). Requests are
/// processed one at a time through this single task, which is what
/// gives the whole server its serialized ordering guarantee (see
/// SPEC_FULL.md §5) — no Arc<Mutex<_>> is shared with a concurrently
/// running handler, because there never is one.
pub async fn run(lifecycle: Arc<Mutex<Lifecycle>>, default_verbosity: Verbosity) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => handle_request(&lifecycle, request, default_verbosity).await,
            Err(e) => RpcResponse {
                jsonrpc: "2.0",
                id: Value::Null,
                result: ok_result(format::format_error(
                    &Error::InvalidInput(format!("malformed JSON-RPC request: {e}")),
                    default_verbosity,
                )),
            },
        };

        let mut serialized = serde_json::to_string(&response)?;
        serialized.push('\n');
        stdout.write_all(serialized.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn handle_request(
    lifecycle: &Arc<Mutex<Lifecycle>>,
    request: RpcRequest,
    default_verbosity: Verbosity,
) -> RpcResponse {
    let id = request.id.unwrap_or(Value::Null);
    let verbosity = verbosity_from_params(&request.params, default_verbosity);

    let text = match request.method.as_str() {
        "initialize_bundle" => dispatch_initialize_bundle(lifecycle, &request.params, verbosity).await,
        "list_available_bundles" => dispatch_list_bundles(lifecycle, &request.params, verbosity).await,
        "kubectl" => dispatch_kubectl(lifecycle, &request.params, verbosity).await,
        "list_files" => dispatch_list_files(lifecycle, &request.params, verbosity).await,
        "read_file" => dispatch_read_file(lifecycle, &request.params, verbosity).await,
        "grep_files" => dispatch_grep_files(lifecycle, &request.params, verbosity).await,
        other => format::format_error(
            &Error::InvalidInput(format!("unknown tool: {other}")),
            verbosity,
        ),
    };

    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: ok_result(text),
    }
}

async fn dispatch_initialize_bundle(lifecycle: &Arc<Mutex<Lifecycle>>, params: &Value, v: Verbosity) -> String {
    let Some(source) = params.get("source").and_then(Value::as_str) else {
        return format::format_error(&Error::InvalidInput("missing 'source'".into()), v);
    };
    let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);

    let mut guard = lifecycle.lock().await;
    match guard
        .initialize(InitializeArgs { source: source.to_string(), force })
        .await
    {
        Ok(bundle) => format::format_bundle_initialization(bundle, v),
        Err(e) => render_error(&guard, &e, v).await,
    }
}

async fn dispatch_list_bundles(lifecycle: &Arc<Mutex<Lifecycle>>, params: &Value, v: Verbosity) -> String {
    let include_invalid = params.get("include_invalid").and_then(Value::as_bool).unwrap_or(false);
    let guard = lifecycle.lock().await;
    match crate::catalogue::list_bundles(&guard.config().bundle_dir, include_invalid) {
        Ok(entries) => format::format_bundle_list(&entries, v),
        Err(e) => render_error(&guard, &e, v).await,
    }
}

async fn dispatch_kubectl(lifecycle: &Arc<Mutex<Lifecycle>>, params: &Value, v: Verbosity) -> String {
    let Some(command) = params.get("command").and_then(Value::as_str) else {
        return format::format_error(&Error::InvalidInput("missing 'command'".into()), v);
    };
    let timeout = params
        .get("timeout_secs")
        .and_then(Value::as_u64)
        .map(std::time::Duration::from_secs);
    let json_output = params.get("json_output").and_then(Value::as_bool).unwrap_or(true);

    let guard = lifecycle.lock().await;
    let Some(active) = guard.active_bundle() else {
        return format::format_error(&Error::NoActiveBundle, v);
    };
    match kubectl_exec::run(active, command, timeout, json_output).await {
        Ok(output) => format::format_kubectl_result(&output, v),
        Err(e) => render_error(&guard, &e, v).await,
    }
}

async fn dispatch_list_files(lifecycle: &Arc<Mutex<Lifecycle>>, params: &Value, v: Verbosity) -> String {
    let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
    let recursive = params.get("recursive").and_then(Value::as_bool).unwrap_or(false);
    let guard = lifecycle.lock().await;
    let Some(active) = guard.active_bundle() else {
        return format::format_error(&Error::NoActiveBundle, v);
    };
    match explorer::list_files(active, path, recursive) {
        Ok(entries) => format::format_file_list(&entries, v),
        Err(e) => render_error(&guard, &e, v).await,
    }
}

async fn dispatch_read_file(lifecycle: &Arc<Mutex<Lifecycle>>, params: &Value, v: Verbosity) -> String {
    let Some(path) = params.get("path").and_then(Value::as_str) else {
        return format::format_error(&Error::InvalidInput("missing 'path'".into()), v);
    };
    let start_line = params.get("start_line").and_then(Value::as_u64).map(|n| n as usize);
    let end_line = params.get("end_line").and_then(Value::as_u64).map(|n| n as usize);

    let guard = lifecycle.lock().await;
    let Some(active) = guard.active_bundle() else {
        return format::format_error(&Error::NoActiveBundle, v);
    };
    match explorer::read_file(active, path, start_line, end_line) {
        Ok(content) => format::format_file_content(&content, v),
        Err(e) => render_error(&guard, &e, v).await,
    }
}

async fn dispatch_grep_files(lifecycle: &Arc<Mutex<Lifecycle>>, params: &Value, v: Verbosity) -> String {
    let Some(pattern) = params.get("pattern").and_then(Value::as_str) else {
        return format::format_error(&Error::InvalidInput("missing 'pattern'".into()), v);
    };
    let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
    let recursive = params.get("recursive").and_then(Value::as_bool).unwrap_or(false);
    let glob_pattern = params.get("glob_pattern").and_then(Value::as_str);
    let case_sensitive = params.get("case_sensitive").and_then(Value::as_bool).unwrap_or(false);
    let max_results = params.get("max_results").and_then(Value::as_u64).unwrap_or(100) as usize;

    let guard = lifecycle.lock().await;
    let Some(active) = guard.active_bundle() else {
        return format::format_error(&Error::NoActiveBundle, v);
    };
    match explorer::grep_files(active, pattern, path, recursive, glob_pattern, case_sensitive, max_results) {
        Ok(result) => format::format_grep_results(&result, v),
        Err(e) => render_error(&guard, &e, v).await,
    }
}
