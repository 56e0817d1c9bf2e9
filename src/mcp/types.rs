//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! Only the subset of the Model Context Protocol that a tool-calling chat
//! client needs is modelled here: the lifecycle handshake, `ping`, and the
//! `tools/*` family. Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]`, and `Option<>` fields omit their
//! key from JSON when `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The most recent supported MCP protocol revision.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// Streamable HTTP revision.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// Original HTTP+SSE revision, still spoken by many published servers.
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";

/// All protocol versions that this client accepts during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    LATEST_PROTOCOL_VERSION,
    PROTOCOL_VERSION_2025_03_26,
    PROTOCOL_VERSION_2024_11_05,
];

// ---------------------------------------------------------------------------
// Method names
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Keepalive ping, sent by either side.
pub const METHOD_PING: &str = "ping";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Server notifies that the tool list has changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Server log message forwarded to the client.
pub const NOTIF_MESSAGE: &str = "notifications/message";

/// JSON-RPC: the method does not exist.
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC: internal error.
pub const ERROR_INTERNAL: i64 = -32603;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// `id` is `None` only for notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier. Present for requests, absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` will be present in a valid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use mcp_chat::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or MCP.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Capabilities this client advertises.
///
/// A plain tool-calling client supports none of the optional client
/// features, so this serializes to `{}`.
///
/// # Examples
///
/// ```
/// use mcp_chat::mcp::types::ClientCapabilities;
///
/// let caps = ClientCapabilities::default();
/// let json = serde_json::to_value(&caps).unwrap();
/// assert_eq!(json, serde_json::json!({}));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

/// The capabilities that a server advertises to a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Server exposes tools via `tools/list` and `tools/call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    pub capabilities: ClientCapabilities,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Response returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Information identifying this server implementation.
    pub server_info: Implementation,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool types
// ---------------------------------------------------------------------------

/// A tool exposed by an MCP server.
///
/// Named `McpTool` to avoid a naming collision with the agent-side tool
/// executors in [`crate::tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Unique name of the tool within the server.
    pub name: String,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description of the tool's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
    /// JSON Schema describing the tool's structured output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Behavioral hints (read-only, destructive, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// Tools in this page of results.
    pub tools: Vec<McpTool>,
    /// Opaque cursor for the next page; `None` means this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Optional extension metadata.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments to pass to the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// Response from a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    /// The content items produced by the tool.
    #[serde(default)]
    pub content: Vec<ToolResponseContent>,
    /// When `true`, the tool signalled an error condition within its content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured output matching the tool's `outputSchema`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResponse {
    /// Whether the server flagged this result as an error
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Flatten the content items into text for the model
    ///
    /// Text items are joined with newlines. Binary items become short
    /// placeholders. When there is no content but structured output exists,
    /// the structured output is rendered as JSON instead.
    pub fn text(&self) -> String {
        if self.content.is_empty() {
            return self
                .structured_content
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
        }
        self.content
            .iter()
            .map(ToolResponseContent::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single content item in a tool response.
///
/// Discriminated by the `"type"` field on the wire.
///
/// # Examples
///
/// ```
/// use mcp_chat::mcp::types::ToolResponseContent;
///
/// let c = ToolResponseContent::Text { text: "hello".to_string() };
/// let json = serde_json::to_value(&c).unwrap();
/// assert_eq!(json["type"], "text");
/// assert_eq!(json["text"], "hello");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResponseContent {
    /// Plain text output.
    Text {
        /// The text content.
        text: String,
    },
    /// A base64-encoded image.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type of the image (e.g. `"image/png"`).
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// A base64-encoded audio clip.
    Audio {
        /// Base64-encoded audio bytes.
        data: String,
        /// MIME type of the audio (e.g. `"audio/wav"`).
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents (`uri` plus `text` or `blob`).
        resource: serde_json::Value,
    },
    /// A link to a resource the client may fetch.
    #[serde(rename = "resource_link")]
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Optional resource name.
        #[serde(default)]
        name: Option<String>,
    },
    /// A content type this client does not know.
    #[serde(other)]
    Unknown,
}

impl ToolResponseContent {
    /// Render one content item as text
    pub fn render(&self) -> String {
        match self {
            ToolResponseContent::Text { text } => text.clone(),
            ToolResponseContent::Image { mime_type, .. } => format!("[image: {}]", mime_type),
            ToolResponseContent::Audio { mime_type, .. } => format!("[audio: {}]", mime_type),
            ToolResponseContent::Resource { resource } => match resource.get("text") {
                Some(serde_json::Value::String(text)) => text.clone(),
                _ => resource.to_string(),
            },
            ToolResponseContent::ResourceLink { uri, .. } => format!("[resource: {}]", uri),
            ToolResponseContent::Unknown => "[unsupported content]".to_string(),
        }
    }
}

/// Generic paginated request parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Opaque cursor from a previous paged response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
