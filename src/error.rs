//! Error types for mcp-chat
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcp-chat operations
///
/// This enum encompasses all possible errors that can occur during
/// configuration loading, MCP server lifecycle, provider interactions,
/// and agent execution.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Generic configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration file does not exist
    #[error("Config file {0} not found")]
    ConfigFileNotFound(String),

    /// The configuration parsed but holds invalid values
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// A `${VAR}` reference in the configuration has no value
    #[error("Unresolved environment variable: ${{{0}}}")]
    UnresolvedEnvVar(String),

    /// JSON5 syntax errors
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),

    /// Provider-related errors (API calls, bad responses, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Missing credentials for provider
    #[error("Missing credentials for provider: {0}")]
    MissingCredentials(String),

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Agent exceeded maximum turn limit
    #[error("Agent exceeded maximum turns: limit={limit}, {message}")]
    MaxTurnsExceeded {
        /// The configured turn limit
        limit: usize,
        /// Additional context about the failure
        message: String,
    },

    /// Agent exceeded its overall time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// General MCP protocol errors (JSON-RPC error responses)
    #[error("MCP error: {0}")]
    Mcp(String),

    /// MCP transport I/O failures
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// An MCP request did not receive a response in time
    #[error("MCP request timed out: server={server}, method={method}")]
    McpTimeout {
        /// Server the request was sent to
        server: String,
        /// JSON-RPC method name
        method: String,
    },

    /// The server negotiated a protocol revision we do not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Versions the client supports
        expected: Vec<String>,
        /// Version returned by the server
        got: String,
    },

    /// The remote server rejected our credentials
    #[error("MCP authentication error: {0}")]
    McpAuth(String),

    /// A named server failed to launch or connect
    #[error("MCP server \"{server}\": {message}")]
    McpServer {
        /// Server name from the configuration
        server: String,
        /// Description of the failure
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for mcp-chat operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
