//! MCP test server binary for integration tests
//!
//! A minimal MCP server speaking newline-delimited JSON-RPC over
//! stdin/stdout. Integration tests launch it through the stdio transport in
//! place of a real server.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol `2025-11-25`, `tools` capability.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- `echo`, `fail` and `getenv`.
//! - `tools/call`:
//!   - `echo` returns `arguments.message`;
//!   - `fail` returns `isError: true`;
//!   - `getenv` returns the value of the variable named by `arguments.name`.
//! - `ping` -- empty result.
//! - Anything else -- `-32601 Method not found`.
//!
//! One line is written to stderr at startup so tests can check that server
//! stderr ends up in the per-server log file.

use std::io::{self, BufRead, Write};

fn main() {
    eprintln!("mcp_test_server: ready");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&serde_json::Value::Null, -32700, "Parse error");
                let _ = writeln!(out, "{}", response);
                let _ = out.flush();
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        if method.starts_with("notifications/") {
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => handle_tools_call(&id, &request),
            "ping" => result(&id, serde_json::json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if writeln!(out, "{}", response).is_err() {
            break;
        }
        if out.flush().is_err() {
            break;
        }
    }

    eprintln!("mcp_test_server: stdin closed");
}

fn handle_initialize(id: &serde_json::Value) -> serde_json::Value {
    result(
        id,
        serde_json::json!({
            "protocolVersion": "2025-11-25",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
        }),
    )
}

fn handle_tools_list(id: &serde_json::Value) -> serde_json::Value {
    let string_param = |name: &str| {
        let mut properties = serde_json::Map::new();
        properties.insert(name.to_string(), serde_json::json!({ "type": "string" }));
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": [name]
        })
    };

    result(
        id,
        serde_json::json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": string_param("message")
                },
                {
                    "name": "fail",
                    "description": "Always reports a tool error",
                    "inputSchema": { "type": "object" }
                },
                {
                    "name": "getenv",
                    "description": "Reads an environment variable of the server process",
                    "inputSchema": string_param("name")
                }
            ]
        }),
    )
}

fn handle_tools_call(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let params = request.get("params").unwrap_or(&serde_json::Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arg = |key: &str| {
        params
            .get("arguments")
            .and_then(|a| a.get(key))
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string()
    };

    let (text, is_error) = match tool_name {
        "echo" => (arg("message"), false),
        "fail" => ("this tool always fails".to_string(), true),
        "getenv" => (std::env::var(arg("name")).unwrap_or_default(), false),
        other => return make_error(id, -32602, &format!("Unknown tool: {}", other)),
    };

    result(
        id,
        serde_json::json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error
        }),
    )
}

fn result(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn make_error(id: &serde_json::Value, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
