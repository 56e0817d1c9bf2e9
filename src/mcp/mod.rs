//! MCP (Model Context Protocol) client support
//!
//! Connects to the configured MCP servers and exposes their tools to the
//! agent. Only the tool surface of the protocol is used.
//!
//! The implementation targets protocol revision **2025-11-25** and accepts
//! **2025-03-26** and **2024-11-05** from older servers.
//!
//! # Module Layout
//!
//! - `types`     -- MCP protocol types and JSON-RPC primitives
//! - `client`    -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- Typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `transport` -- `Transport` trait and implementations (stdio, Streamable
//!   HTTP, legacy SSE, WebSocket)
//! - `server`    -- One live server session
//! - `manager`   -- All sessions for a chat run
//! - `tool`      -- Adapter from an MCP tool to the agent's `ToolExecutor`

pub mod client;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod tool;
pub mod transport;
pub mod types;

pub use manager::McpManager;
pub use server::McpServer;
pub use tool::McpToolExecutor;
