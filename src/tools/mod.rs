//! Tools module for mcp-chat
//!
//! Defines the tool abstraction the agent works with. Every tool the model
//! can call is a [`ToolExecutor`]; the MCP bridge in [`crate::mcp::tool`]
//! provides one executor per tool exposed by a connected server.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Tool result structure
///
/// Represents the result of a tool execution with metadata
/// and truncation support.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if execution failed
    pub error: Option<String>,
    /// Whether the output was truncated
    pub truncated: bool,
    /// Additional metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed tool result
    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result
    ///
    /// # Returns
    ///
    /// Returns self for chaining
    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Truncate output and error text that exceed the maximum size
    ///
    /// The cut lands on a character boundary at or below `max_size` bytes.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum size in bytes
    pub fn truncate_if_needed(mut self, max_size: usize) -> Self {
        let mut truncated = truncate_text(&mut self.output, max_size);
        if let Some(error) = self.error.as_mut() {
            truncated |= truncate_text(error, max_size);
        }
        self.truncated |= truncated;
        self
    }

    /// Convert to a message string for the conversation
    pub fn to_message(&self) -> String {
        if self.success {
            if self.truncated {
                format!("{}\n(Output truncated to fit context window)", self.output)
            } else {
                self.output.clone()
            }
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            )
        }
    }
}

fn truncate_text(text: &mut String, max_size: usize) -> bool {
    if text.len() <= max_size {
        return false;
    }
    let mut cut = max_size;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... (truncated)");
    true
}

/// Tool executor trait for implementing tool execution logic
///
/// # Examples
///
/// ```no_run
/// use mcp_chat::tools::ToolExecutor;
/// use mcp_chat::error::Result;
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct MyTool;
///
/// #[async_trait]
/// impl ToolExecutor for MyTool {
///     fn tool_definition(&self) -> Value {
///         serde_json::json!({
///             "name": "my_tool",
///             "description": "Does something useful",
///             "parameters": {
///                 "type": "object",
///                 "properties": {}
///             }
///         })
///     }
///
///     async fn execute(&self, args: Value) -> Result<mcp_chat::tools::ToolResult> {
///         Ok(mcp_chat::tools::ToolResult::success("Success".to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool definition as a JSON value
    ///
    /// The definition follows the OpenAI function calling format:
    /// ```json
    /// {
    ///   "name": "tool_name",
    ///   "description": "Tool description",
    ///   "parameters": { "type": "object", "properties": {} }
    /// }
    /// ```
    fn tool_definition(&self) -> serde_json::Value;

    /// Executes the tool with the given arguments
    ///
    /// A tool that ran but reported failure returns `Ok` with a failed
    /// [`ToolResult`]; `Err` means the call itself could not be made.
    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult>;
}

/// Tool registry for managing available tools
///
/// Definitions are returned in registration order so the tool list sent to
/// the model is stable from turn to turn.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool executor in the registry
    ///
    /// The first registration of a name wins.
    ///
    /// # Returns
    ///
    /// Returns `false` when a tool with the same name was already present.
    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) -> bool {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return false;
        }
        self.order.push(name.clone());
        self.tools.insert(name, executor);
        true
    }

    /// Get a tool executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Get all tool definitions as JSON values, in registration order
    pub fn all_definitions(&self) -> Vec<serde_json::Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|executor| executor.tool_definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}
