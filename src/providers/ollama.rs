//! Ollama provider implementation for mcp-chat
//!
//! This module implements the Provider trait for Ollama, connecting to a local
//! or remote Ollama server to generate completions with tool calling support.

use crate::config::LlmConfig;
use crate::error::{ChatError, Result};
use crate::providers::base::{build_http_client, error_for_status};
use crate::providers::{
    validate_message_sequence, CompletionResponse, FunctionCall, Message, Provider, TokenUsage,
    ToolCall,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default Ollama server
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Model used when the configuration names none
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Ollama API provider
///
/// # Examples
///
/// ```
/// use mcp_chat::config::LlmConfig;
/// use mcp_chat::providers::{OllamaProvider, Provider};
///
/// let config = LlmConfig {
///     model_provider: "ollama".to_string(),
///     model: Some("llama3.2:latest".to_string()),
///     temperature: None,
///     max_tokens: None,
///     system_prompt: None,
///     base_url: None,
///     api_key: None,
/// };
/// let provider = OllamaProvider::new(&config).unwrap();
/// assert_eq!(provider.model(), "llama3.2:latest");
/// assert_eq!(provider.host(), "http://localhost:11434");
/// ```
#[derive(Debug)]
pub struct OllamaProvider {
    client: Client,
    host: String,
    model: String,
    options: OllamaOptions,
}

/// Request structure for Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    #[serde(skip_serializing_if = "OllamaOptions::is_empty")]
    options: OllamaOptions,
    stream: bool,
}

/// Sampling options forwarded to Ollama
#[derive(Debug, Clone, Default, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

/// Message structure for Ollama API
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

/// Tool definition for Ollama API
#[derive(Debug, Serialize)]
struct OllamaTool {
    r#type: String,
    function: OllamaFunction,
}

/// Function definition for Ollama tools
#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// Tool call in Ollama format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "default_tool_type")]
    r#type: String,
    function: OllamaFunctionCall,
}

/// Function call details in Ollama format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

fn default_tool_type() -> String {
    "function".to_string()
}

/// Response structure from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
}

impl OllamaProvider {
    /// Create a new Ollama provider instance
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = build_http_client()?;
        let host = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());

        tracing::debug!("Initialized Ollama provider: host={}, model={}", host, model);

        Ok(Self {
            client,
            host,
            model,
            options: OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
        })
    }

    /// Get the configured Ollama host
    pub fn host(&self) -> &str {
        &self.host
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        validate_message_sequence(messages)
            .iter()
            .filter_map(|m| {
                // Skip messages without content (unless they have tool calls)
                if m.content.is_none() && m.tool_calls.is_none() {
                    return None;
                }

                let tool_calls = m.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|tc| OllamaToolCall {
                            id: tc.id.clone(),
                            r#type: "function".to_string(),
                            function: OllamaFunctionCall {
                                name: tc.function.name.clone(),
                                arguments: crate::providers::base::arguments_as_value(
                                    &tc.function.arguments,
                                ),
                            },
                        })
                        .collect()
                });

                Some(OllamaMessage {
                    role: m.role.clone(),
                    content: m.content.clone().unwrap_or_default(),
                    tool_calls,
                })
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[serde_json::Value]) -> Vec<OllamaTool> {
        tools
            .iter()
            .filter_map(|t| {
                let obj = t.as_object()?;
                let name = obj.get("name")?.as_str()?.to_string();
                let description = obj
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string();
                let parameters = obj
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" }));

                Some(OllamaTool {
                    r#type: "function".to_string(),
                    function: OllamaFunction {
                        name,
                        description,
                        parameters,
                    },
                })
            })
            .collect()
    }

    fn convert_response_message(&self, ollama_msg: OllamaMessage) -> Message {
        match ollama_msg.tool_calls {
            Some(tool_calls) if !tool_calls.is_empty() => {
                let converted_calls: Vec<ToolCall> = tool_calls
                    .into_iter()
                    .enumerate()
                    .map(|(idx, tc)| ToolCall {
                        // Ollama usually omits ids; the agent needs them to pair results.
                        id: if tc.id.is_empty() {
                            format!(
                                "call_{}_{}",
                                std::time::SystemTime::now()
                                    .duration_since(std::time::UNIX_EPOCH)
                                    .unwrap_or_default()
                                    .as_millis(),
                                idx
                            )
                        } else {
                            tc.id
                        },
                        function: FunctionCall {
                            name: tc.function.name,
                            arguments: serde_json::to_string(&tc.function.arguments)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    })
                    .collect();

                let mut message = Message::assistant_with_tools(converted_calls);
                if !ollama_msg.content.is_empty() {
                    message.content = Some(ollama_msg.content);
                }
                message
            }
            _ => Message::assistant(ollama_msg.content),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
    ) -> Result<CompletionResponse> {
        let url = format!("{}/api/chat", self.host);

        let ollama_request = OllamaRequest {
            model: self.model.clone(),
            messages: self.convert_messages(messages),
            tools: self.convert_tools(tools),
            options: self.options.clone(),
            stream: false,
        };

        tracing::debug!(
            "Sending Ollama request: {} messages, {} tools",
            ollama_request.messages.len(),
            ollama_request.tools.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Ollama request failed: {}", e);
                ChatError::Provider(format!("Ollama request failed: {}", e))
            })?;

        let response = error_for_status("Ollama", response).await?;

        let ollama_response: OllamaResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse Ollama response: {}", e);
            ChatError::Provider(format!("Failed to parse Ollama response: {}", e))
        })?;

        tracing::debug!(
            "Ollama response: done={}, prompt_tokens={}, completion_tokens={}",
            ollama_response.done,
            ollama_response.prompt_eval_count,
            ollama_response.eval_count
        );

        let message = self.convert_response_message(ollama_response.message);

        let response = if ollama_response.prompt_eval_count > 0 || ollama_response.eval_count > 0 {
            let usage = TokenUsage::new(
                ollama_response.prompt_eval_count,
                ollama_response.eval_count,
            );
            CompletionResponse::with_usage(message, usage)
        } else {
            CompletionResponse::new(message)
        };

        Ok(response)
    }
}
