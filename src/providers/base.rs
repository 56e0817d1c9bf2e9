//! Base provider trait and common types for mcp-chat
//!
//! This module defines the Provider trait that all LLM providers implement,
//! along with the provider-neutral message and response types the agent
//! works with. Each provider translates these into its own wire format.

use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message structure for conversation
///
/// Represents a message in the conversation with the AI provider.
/// Messages can be from the user, assistant, system, or tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: String,
    /// Content of the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Optional tool calls in the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Optional tool call ID (for tool result messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_chat::providers::Message;
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new tool result message
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_chat::providers::Message;
    ///
    /// let msg = Message::tool_result("call_123", "72F and sunny");
    /// assert_eq!(msg.role, "tool");
    /// assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
    /// ```
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Creates an assistant message with tool calls
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_chat::providers::{Message, ToolCall, FunctionCall};
    ///
    /// let tool_call = ToolCall {
    ///     id: "call_123".to_string(),
    ///     function: FunctionCall {
    ///         name: "get_weather".to_string(),
    ///         arguments: r#"{"city":"Oslo"}"#.to_string(),
    ///     },
    /// };
    /// let msg = Message::assistant_with_tools(vec![tool_call]);
    /// assert_eq!(msg.role, "assistant");
    /// assert!(msg.has_tool_calls());
    /// ```
    pub fn assistant_with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Whether this message requests at least one tool call
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }
}

/// Function call information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function/tool to call
    pub name: String,
    /// Arguments for the function (as JSON string)
    pub arguments: String,
}

/// Tool call structure
///
/// Represents a request from the AI to execute a tool with specific arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Function call details
    pub function: FunctionCall,
}

/// Token usage information from a completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: usize,
    /// Number of tokens in the completion
    pub completion_tokens: usize,
    /// Total tokens used (prompt + completion)
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_chat::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Completion response with message and optional token usage
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The response message from the AI
    pub message: Message,
    /// Optional token usage information
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    /// Create a new CompletionResponse
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    /// Create a new CompletionResponse with token usage
    pub fn with_usage(message: Message, usage: TokenUsage) -> Self {
        Self {
            message,
            usage: Some(usage),
        }
    }
}

/// Provider trait for LLM providers
///
/// # Examples
///
/// ```no_run
/// use mcp_chat::providers::{Provider, Message, CompletionResponse};
/// use mcp_chat::error::Result;
/// use async_trait::async_trait;
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl Provider for MyProvider {
///     fn name(&self) -> &str {
///         "mine"
///     }
///
///     fn model(&self) -> &str {
///         "my-model"
///     }
///
///     async fn complete(
///         &self,
///         messages: &[Message],
///         tools: &[serde_json::Value],
///     ) -> Result<CompletionResponse> {
///         Ok(CompletionResponse::new(Message::assistant("Response")))
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name used in logs and errors
    fn name(&self) -> &str;

    /// Model this provider sends requests to
    fn model(&self) -> &str;

    /// Completes a conversation with the given messages and available tools
    ///
    /// # Arguments
    ///
    /// * `messages` - Conversation history
    /// * `tools` - Tool definitions (`{name, description, parameters}`)
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails or response is invalid
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
    ) -> Result<CompletionResponse>;
}

/// Build the HTTP client shared by the provider implementations.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .user_agent(concat!("mcp-chat/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ChatError::Provider(format!("Failed to create HTTP client: {}", e)).into())
}

/// Turn a non-2xx provider response into a [`ChatError::Provider`].
pub(crate) async fn error_for_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    tracing::error!("{} returned error {}: {}", provider, status, error_text);
    Err(ChatError::Provider(format!(
        "{} returned error {}: {}",
        provider, status, error_text
    ))
    .into())
}

/// Resolve the API key from the config or `env_var`.
pub(crate) fn resolve_api_key(
    provider: &str,
    configured: Option<&str>,
    env_var: &str,
) -> Result<String> {
    configured
        .map(str::to_string)
        .filter(|key| !key.trim().is_empty())
        .or_else(|| {
            std::env::var(env_var)
                .ok()
                .filter(|key| !key.trim().is_empty())
        })
        .ok_or_else(|| {
            ChatError::MissingCredentials(format!(
                "{} (set llm.api_key or {})",
                provider, env_var
            ))
            .into()
        })
}

/// Validate and fix message sequence by removing orphan tool messages
///
/// A tool message is kept only when an earlier assistant message issued a
/// tool call with the same id. Every provider API rejects orphans.
pub fn validate_message_sequence(messages: &[Message]) -> Vec<Message> {
    use std::collections::HashSet;

    let mut valid_tool_ids: HashSet<String> = HashSet::new();
    for message in messages {
        if message.role == "assistant" {
            if let Some(tool_calls) = &message.tool_calls {
                for tool_call in tool_calls {
                    valid_tool_ids.insert(tool_call.id.clone());
                }
            }
        }
    }

    messages
        .iter()
        .filter_map(|message| {
            if message.role == "tool" {
                if let Some(tool_call_id) = &message.tool_call_id {
                    if !valid_tool_ids.contains(tool_call_id) {
                        tracing::warn!(
                            "Dropping orphan tool message with tool_call_id: {}",
                            tool_call_id
                        );
                        return None;
                    }
                } else {
                    tracing::warn!("Dropping tool message without tool_call_id");
                    return None;
                }
            }

            Some(message.clone())
        })
        .collect()
}

/// Parse a tool definition's `arguments` JSON string, treating bad JSON as `{}`.
pub(crate) fn arguments_as_value(arguments: &str) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| serde_json::json!({}))
}
