//! Owns every configured MCP server for the lifetime of a chat session

use std::path::Path;
use std::sync::Arc;

use crate::config::McpServerConfig;
use crate::error::Result;
use crate::mcp::server::McpServer;
use crate::mcp::tool::McpToolExecutor;
use crate::tools::ToolRegistry;

/// Collection of live MCP sessions, in start order.
#[derive(Debug, Default)]
pub struct McpManager {
    servers: Vec<Arc<McpServer>>,
}

impl McpManager {
    /// Start every server in configuration order.
    ///
    /// Servers are started one after another. If one fails, the servers
    /// already running are shut down and that failure is returned; nothing
    /// is retried.
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::error::ChatError::McpServer`] encountered.
    pub async fn connect_all(
        servers: &[(String, McpServerConfig)],
        log_dir: &Path,
    ) -> Result<Self> {
        tracing::info!("Initializing {} MCP server(s)...", servers.len());

        let mut manager = Self::default();
        for (name, config) in servers {
            match McpServer::start(name, config, log_dir).await {
                Ok(server) => manager.servers.push(Arc::new(server)),
                Err(e) => {
                    manager.shutdown().await;
                    return Err(e);
                }
            }
        }
        Ok(manager)
    }

    /// Wrap already started servers
    pub fn from_servers(servers: Vec<Arc<McpServer>>) -> Self {
        Self { servers }
    }

    /// Live sessions in start order
    pub fn servers(&self) -> &[Arc<McpServer>] {
        &self.servers
    }

    /// One executor per tool across all servers, in server then tool order.
    ///
    /// When two servers expose the same tool name the first one keeps it and
    /// the later one is skipped with a warning.
    pub fn tools(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for server in &self.servers {
            for tool in server.tools() {
                let executor = McpToolExecutor::new(Arc::clone(server), tool.clone());
                if !registry.register(tool.name.clone(), Arc::new(executor)) {
                    tracing::warn!(
                        "MCP server \"{}\": tool \"{}\" is already provided by another server; skipping",
                        server.name(),
                        tool.name
                    );
                }
            }
        }
        tracing::info!(
            "MCP servers initialized: {} tool(s) available in total",
            registry.len()
        );
        registry
    }

    /// Close every session, most recently started first. Idempotent.
    pub async fn shutdown(&mut self) {
        while let Some(server) = self.servers.pop() {
            server.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
    use crate::mcp::types::LATEST_PROTOCOL_VERSION;

    fn spawn_fake_server(mut handle: FakeTransportHandle, tools: Vec<&'static str>) {
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
                        "serverInfo": { "name": "fake", "version": "1.0.0" }
                    }),
                    "tools/list" => serde_json::json!({
                        "tools": tools
                            .iter()
                            .map(|name| serde_json::json!({ "name": name, "inputSchema": {} }))
                            .collect::<Vec<_>>()
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

    async fn fake_server(name: &str, tools: Vec<&'static str>) -> Arc<McpServer> {
        let (transport, handle) = FakeTransport::new();
        spawn_fake_server(handle, tools);
        Arc::new(
            McpServer::from_transport(name, Arc::new(transport))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_tools_are_collected_in_order_and_first_wins() {
        let first = fake_server("first", vec!["search", "fetch"]).await;
        let second = fake_server("second", vec!["fetch", "summarize"]).await;
        let manager = McpManager::from_servers(vec![first, second]);

        let registry = manager.tools();
        assert_eq!(registry.names(), ["search", "fetch", "summarize"]);

        let definition = registry.get("fetch").unwrap().tool_definition();
        assert_eq!(definition["name"], "fetch");
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_sessions_and_is_idempotent() {
        let a = fake_server("a", vec![]).await;
        let b = fake_server("b", vec![]).await;
        let mut manager = McpManager::from_servers(vec![Arc::clone(&a), Arc::clone(&b)]);

        manager.shutdown().await;
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert!(manager.servers().is_empty());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_all_with_no_servers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = McpManager::connect_all(&[], dir.path()).await.unwrap();
        assert!(manager.servers().is_empty());
        assert!(manager.tools().is_empty());
    }

    #[tokio::test]
    async fn test_connect_all_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let servers = vec![
            (
                "missing".to_string(),
                McpServerConfig {
                    command: Some("/nonexistent/first-server".to_string()),
                    ..Default::default()
                },
            ),
            (
                "never-started".to_string(),
                McpServerConfig {
                    command: Some("/nonexistent/second-server".to_string()),
                    ..Default::default()
                },
            ),
        ];

        let err = McpManager::connect_all(&servers, dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("\"missing\""), "{err}");
    }
}
