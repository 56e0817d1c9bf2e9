//! Exposes MCP server tools to the agent
//!
//! Each [`McpToolExecutor`] wraps one tool of one [`McpServer`] and
//! implements [`ToolExecutor`], so the agent calls remote tools exactly like
//! local ones.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::mcp::server::McpServer;
use crate::mcp::types::McpTool;
use crate::tools::{ToolExecutor, ToolResult};

/// Agent-facing adapter for a single MCP tool.
#[derive(Debug, Clone)]
pub struct McpToolExecutor {
    server: Arc<McpServer>,
    tool: McpTool,
}

impl McpToolExecutor {
    pub fn new(server: Arc<McpServer>, tool: McpTool) -> Self {
        Self { server, tool }
    }

    /// Tool name as advertised by the server
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    /// Name of the server that owns this tool
    pub fn server_name(&self) -> &str {
        self.server.name()
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    fn tool_definition(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.tool.name,
            "description": self.tool.description.clone().unwrap_or_default(),
            "parameters": self.tool.input_schema,
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult> {
        tracing::info!(
            "MCP tool \"{}\"/\"{}\" received input: {}",
            self.server.name(),
            self.tool.name,
            args
        );

        // Servers expect an object; a model that sends null gets `{}`.
        let arguments = match args {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };

        let response = self
            .server
            .call_tool(&self.tool.name, Some(arguments))
            .await?;
        let text = response.text();

        tracing::info!(
            "MCP tool \"{}\"/\"{}\" received result (size: {})",
            self.server.name(),
            self.tool.name,
            text.len()
        );

        let result = if response.is_error() {
            ToolResult::error(text)
        } else {
            ToolResult::success(text)
        };
        Ok(result
            .with_metadata("server".to_string(), self.server.name().to_string())
            .with_metadata("tool".to_string(), self.tool.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
    use crate::mcp::types::LATEST_PROTOCOL_VERSION;

    /// Server whose `fail` tool reports `isError` and whose `weather` tool
    /// echoes its arguments.
    fn spawn_fake_server(mut handle: FakeTransportHandle) {
        tokio::spawn(async move {
            while let Some(raw) = handle.outbound_rx.recv().await {
                let req: serde_json::Value = serde_json::from_str(&raw).unwrap();
                let Some(id) = req.get("id").cloned() else {
                    continue;
                };
                let result = match req["method"].as_str().unwrap_or_default() {
                    "initialize" => serde_json::json!({
                        "protocolVersion": LATEST_PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "weather-server", "version": "1.0.0" }
                    }),
                    "tools/list" => serde_json::json!({
                        "tools": [
                            {
                                "name": "weather",
                                "description": "Current weather",
                                "inputSchema": {
                                    "type": "object",
                                    "properties": { "city": { "type": "string" } },
                                    "required": ["city"]
                                }
                            },
                            { "name": "fail", "inputSchema": { "type": "object" } }
                        ]
                    }),
                    "tools/call" if req["params"]["name"] == "fail" => serde_json::json!({
                        "content": [{ "type": "text", "text": "city not found" }],
                        "isError": true
                    }),
                    "tools/call" => serde_json::json!({
                        "content": [
                            { "type": "text", "text": format!("args={}", req["params"]["arguments"]) },
                            { "type": "image", "data": "AAAA", "mimeType": "image/png" }
                        ]
                    }),
                    _ => serde_json::json!({}),
                };
                let resp = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
                if handle.inbound_tx.send(resp.to_string()).is_err() {
                    break;
                }
            }
        });
    }

    async fn executors() -> Vec<McpToolExecutor> {
        let (transport, handle) = FakeTransport::new();
        spawn_fake_server(handle);
        let server = Arc::new(
            McpServer::from_transport("weather", Arc::new(transport))
                .await
                .unwrap(),
        );
        server
            .tools()
            .iter()
            .cloned()
            .map(|tool| McpToolExecutor::new(Arc::clone(&server), tool))
            .collect()
    }

    #[tokio::test]
    async fn test_definition_uses_input_schema() {
        let tools = executors().await;
        let def = tools[0].tool_definition();
        assert_eq!(def["name"], "weather");
        assert_eq!(def["description"], "Current weather");
        assert_eq!(def["parameters"]["required"][0], "city");
        assert_eq!(tools[0].server_name(), "weather");

        let bare = tools[1].tool_definition();
        assert_eq!(bare["description"], "");
    }

    #[tokio::test]
    async fn test_execute_joins_content() {
        let tools = executors().await;
        let result = tools[0]
            .execute(serde_json::json!({ "city": "Oslo" }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.output,
            "args={\"city\":\"Oslo\"}\n[image: image/png]"
        );
        assert_eq!(result.metadata.get("server").map(String::as_str), Some("weather"));
    }

    #[tokio::test]
    async fn test_execute_null_arguments_become_empty_object() {
        let tools = executors().await;
        let result = tools[0].execute(serde_json::Value::Null).await.unwrap();
        assert_eq!(result.output.lines().next(), Some("args={}"));
    }

    #[tokio::test]
    async fn test_is_error_yields_failed_result() {
        let tools = executors().await;
        let result = tools[1].execute(serde_json::json!({})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("city not found"));
    }
}
