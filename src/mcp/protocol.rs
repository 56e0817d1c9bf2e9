//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! Two types represent the two phases of an MCP client session:
//!
//! - [`McpProtocol`] -- an uninitialized client. Call [`McpProtocol::initialize`]
//!   to perform the `initialize` / `notifications/initialized` handshake and
//!   receive an [`InitializedMcpProtocol`].
//! - [`InitializedMcpProtocol`] -- a negotiated session offering `tools/list`,
//!   `tools/call` and `ping` as typed async methods.
//!
//! Neither type owns a transport; callers wire up channels externally and pass
//! the resulting [`JsonRpcClient`] into [`McpProtocol::new`].

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsResponse, McpTool, PaginatedParams, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Upper bound on `tools/list` pages fetched for one server.
pub const MAX_TOOL_LIST_PAGES: usize = 100;

/// An MCP session that has not completed the handshake yet.
#[derive(Debug)]
pub struct McpProtocol {
    client: JsonRpcClient,
}

impl McpProtocol {
    /// Create a new uninitialized MCP protocol session.
    ///
    /// # Arguments
    ///
    /// * `client` - A channel-wired [`JsonRpcClient`]. The caller must have
    ///   already called [`crate::mcp::client::start_read_loop`].
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }

    /// Perform the MCP `initialize` / `notifications/initialized` handshake.
    ///
    /// Proposes [`LATEST_PROTOCOL_VERSION`] and accepts any version in
    /// [`SUPPORTED_PROTOCOL_VERSIONS`] chosen by the server.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpProtocolVersion`] if the server picks a
    /// version we do not speak, plus any error from
    /// [`JsonRpcClient::request`].
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
        timeout: Option<Duration>,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                timeout,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(ChatError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        tracing::debug!(
            server = %self.client.server(),
            "Negotiated MCP {} with {} {}",
            response.protocol_version,
            response.server_info.name,
            response.server_info.version
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A fully negotiated MCP client session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub client: JsonRpcClient,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Whether the server advertises the `tools` capability
    pub fn has_tools(&self) -> bool {
        self.initialize_response.capabilities.tools.is_some()
    }

    /// Protocol revision chosen by the server
    pub fn protocol_version(&self) -> &str {
        &self.initialize_response.protocol_version
    }

    /// List all tools advertised by the server, following pagination.
    ///
    /// Issues `tools/list` requests until the server stops returning a
    /// `nextCursor`.
    ///
    /// # Errors
    ///
    /// Returns an error if any paged request fails, and [`ChatError::Mcp`]
    /// when the server repeats a cursor or pages past
    /// [`MAX_TOOL_LIST_PAGES`].
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();

        for _ in 0..MAX_TOOL_LIST_PAGES {
            let resp: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, None)
                .await?;

            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => {
                    if !seen.insert(c.clone()) {
                        return Err(ChatError::Mcp(format!(
                            "tools/list returned cursor \"{}\" twice",
                            c
                        ))
                        .into());
                    }
                    cursor = Some(c);
                }
                _ => return Ok(tools),
            }
        }

        Err(ChatError::Mcp(format!(
            "tools/list did not finish within {} pages",
            MAX_TOOL_LIST_PAGES
        ))
        .into())
    }

    /// Invoke a named tool on the server.
    ///
    /// A result with `isError: true` is returned as `Ok`; the caller decides
    /// how to surface it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns a
    /// JSON-RPC error.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                timeout,
            )
            .await
    }

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.client.request(METHOD_PING, (), None).await?;
        Ok(())
    }
}
