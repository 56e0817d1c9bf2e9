//! mcp-chat - Interactive LLM chat with MCP server tools
//!
//! This library provides the pieces behind the `mcp-chat` binary: loading
//! the JSON5 configuration, starting MCP servers and exposing their tools,
//! talking to LLM providers, and the agent loop that ties them together.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `config`: JSON5 configuration with `${VAR}` substitution
//! - `mcp`: MCP client (transports, protocol, server sessions)
//! - `tools`: Tool registry the agent calls through
//! - `providers`: LLM provider abstraction (OpenAI, Anthropic, Ollama)
//! - `agent`: Tool-calling loop and conversation history
//! - `chat`: Interactive prompt
//! - `cli`, `logging`, `error`: Command line, tracing setup, error types
//!
//! # Example
//!
//! ```no_run
//! use mcp_chat::agent::Agent;
//! use mcp_chat::mcp::McpManager;
//! use mcp_chat::providers::create_provider;
//! use mcp_chat::Config;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("llm_mcp_config.json5"))?;
//!     let provider = create_provider(&config.llm)?;
//!     let mut manager = McpManager::connect_all(&config.mcp_servers, Path::new(".")).await?;
//!
//!     let mut agent = Agent::new(provider, manager.tools(), config.agent.clone())?;
//!     let outcome = agent.execute("What tools do you have?").await;
//!     manager.shutdown().await;
//!     println!("{}", outcome?.response);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod providers;
pub mod tools;

// Re-export commonly used types
pub use agent::Agent;
pub use config::Config;
pub use error::{ChatError, Result};
