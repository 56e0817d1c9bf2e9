//! Anthropic provider implementation for mcp-chat
//!
//! Talks to the Messages API (`POST {base}/v1/messages`). System messages
//! are hoisted into the top-level `system` field and tool traffic is
//! expressed as `tool_use` / `tool_result` content blocks.

use crate::config::LlmConfig;
use crate::error::{ChatError, Result};
use crate::providers::base::{
    arguments_as_value, build_http_client, error_for_status, resolve_api_key,
};
use crate::providers::{
    validate_message_sequence, CompletionResponse, FunctionCall, Message, Provider, TokenUsage,
    ToolCall,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default API root
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Model used when the configuration names none
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

/// Environment variable consulted when `llm.api_key` is unset
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Value of the `anthropic-version` header
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory for this API
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    /// Blocks this client does not act on (thinking, etc.)
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingCredentials`] when no API key is
    /// configured, or an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(
            "anthropic",
            config.api_key.as_deref(),
            ANTHROPIC_API_KEY_ENV,
        )?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string());

        tracing::debug!(
            "Initialized Anthropic provider: base_url={}, model={}",
            base_url,
            model
        );

        Ok(Self {
            client: build_http_client()?,
            base_url,
            api_key,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    /// Split the conversation into the `system` string and API messages.
    ///
    /// Consecutive tool results are merged into one user turn, which is the
    /// shape the API requires after an assistant turn with several
    /// `tool_use` blocks.
    fn convert_messages(&self, messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut converted: Vec<AnthropicMessage> = Vec::new();

        for m in validate_message_sequence(messages) {
            match m.role.as_str() {
                "system" => {
                    if let Some(content) = m.content {
                        system_parts.push(content);
                    }
                }
                "tool" => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: m.tool_call_id.unwrap_or_default(),
                        content: m.content.unwrap_or_default(),
                    };
                    match converted.last_mut() {
                        Some(last)
                            if last.role == "user"
                                && last
                                    .content
                                    .iter()
                                    .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                        {
                            last.content.push(block)
                        }
                        _ => converted.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
                "assistant" => {
                    let mut blocks = Vec::new();
                    if let Some(text) = m.content.filter(|t| !t.is_empty()) {
                        blocks.push(ContentBlock::Text { text });
                    }
                    for call in m.tool_calls.unwrap_or_default() {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id,
                            name: call.function.name,
                            input: arguments_as_value(&call.function.arguments),
                        });
                    }
                    if !blocks.is_empty() {
                        converted.push(AnthropicMessage {
                            role: "assistant".to_string(),
                            content: blocks,
                        });
                    }
                }
                _ => {
                    if let Some(text) = m.content {
                        converted.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: vec![ContentBlock::Text { text }],
                        });
                    }
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, converted)
    }

    fn convert_tools(&self, tools: &[serde_json::Value]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .filter_map(|t| {
                let obj = t.as_object()?;
                Some(AnthropicTool {
                    name: obj.get("name")?.as_str()?.to_string(),
                    description: obj
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: obj
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                })
            })
            .collect()
    }

    fn convert_response_content(&self, content: Vec<ContentBlock>) -> Message {
        let mut text_parts = Vec::new();
        let mut calls = Vec::new();

        for block in content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                    id,
                    function: FunctionCall {
                        name,
                        arguments: serde_json::to_string(&input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                }),
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }

        let text = text_parts.join("");
        if calls.is_empty() {
            Message::assistant(text)
        } else {
            let mut message = Message::assistant_with_tools(calls);
            if !text.is_empty() {
                message.content = Some(text);
            }
            message
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
    ) -> Result<CompletionResponse> {
        let (system, messages) = self.convert_messages(messages);
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages,
            tools: self.convert_tools(tools),
            temperature: self.temperature,
        };

        tracing::debug!(
            "Sending Anthropic request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Anthropic request failed: {}", e);
                ChatError::Provider(format!("Anthropic request failed: {}", e))
            })?;

        let response = error_for_status("Anthropic", response).await?;

        let anthropic_response: AnthropicResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse Anthropic response: {}", e);
            ChatError::Provider(format!("Failed to parse Anthropic response: {}", e))
        })?;

        tracing::debug!(
            "Anthropic response: stop_reason={}",
            anthropic_response
                .stop_reason
                .as_deref()
                .unwrap_or("unknown")
        );

        let message = self.convert_response_content(anthropic_response.content);
        Ok(match anthropic_response.usage {
            Some(usage) => CompletionResponse::with_usage(
                message,
                TokenUsage::new(usage.input_tokens, usage.output_tokens),
            ),
            None => CompletionResponse::new(message),
        })
    }
}
