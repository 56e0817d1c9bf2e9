//! Agent module for mcp-chat
//!
//! This module contains the agent loop and the conversation history it
//! maintains across queries.

pub mod conversation;
pub mod core;

pub use conversation::Conversation;
pub use core::{Agent, AgentOutcome};
