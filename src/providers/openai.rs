//! OpenAI provider implementation for mcp-chat
//!
//! Talks to the Chat Completions API (`POST {base}/chat/completions`).
//! Any OpenAI-compatible server works when `llm.base_url` points at it.

use crate::config::LlmConfig;
use crate::error::{ChatError, Result};
use crate::providers::base::{build_http_client, error_for_status, resolve_api_key};
use crate::providers::{
    validate_message_sequence, CompletionResponse, FunctionCall, Message, Provider, TokenUsage,
    ToolCall,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default API root
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used when the configuration names none
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Environment variable consulted when `llm.api_key` is unset
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI Chat Completions provider
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(default = "default_tool_type")]
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingCredentials`] when no API key is
    /// configured, or an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key("openai", config.api_key.as_deref(), OPENAI_API_KEY_ENV)?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());

        tracing::debug!(
            "Initialized OpenAI provider: base_url={}, model={}",
            base_url,
            model
        );

        Ok(Self {
            client: build_http_client()?,
            base_url,
            api_key,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// API root requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<OpenAiMessage> {
        validate_message_sequence(messages)
            .iter()
            .filter_map(|m| {
                if m.content.is_none() && m.tool_calls.is_none() {
                    return None;
                }

                let tool_calls = m.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|tc| OpenAiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: tc.function.name.clone(),
                                arguments: tc.function.arguments.clone(),
                            },
                        })
                        .collect()
                });

                Some(OpenAiMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                })
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[serde_json::Value]) -> Vec<OpenAiTool> {
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

                Some(OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name,
                        description,
                        parameters,
                    },
                })
            })
            .collect()
    }

    fn convert_response_message(&self, openai_msg: OpenAiMessage) -> Message {
        match openai_msg.tool_calls {
            Some(tool_calls) if !tool_calls.is_empty() => {
                let calls = tool_calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        function: FunctionCall {
                            name: tc.function.name,
                            arguments: tc.function.arguments,
                        },
                    })
                    .collect();
                let mut message = Message::assistant_with_tools(calls);
                message.content = openai_msg.content.filter(|c| !c.is_empty());
                message
            }
            _ => Message::assistant(openai_msg.content.unwrap_or_default()),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[serde_json::Value],
    ) -> Result<CompletionResponse> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: self.convert_messages(messages),
            tools: self.convert_tools(tools),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            "Sending OpenAI request: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("OpenAI request failed: {}", e);
                ChatError::Provider(format!("OpenAI request failed: {}", e))
            })?;

        let response = error_for_status("OpenAI", response).await?;

        let openai_response: OpenAiResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse OpenAI response: {}", e);
            ChatError::Provider(format!("Failed to parse OpenAI response: {}", e))
        })?;

        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Provider("No choices in OpenAI response".to_string()))?;

        tracing::debug!(
            "OpenAI response: finish_reason={}",
            choice.finish_reason.as_deref().unwrap_or("unknown")
        );

        let message = self.convert_response_message(choice.message);
        Ok(match openai_response.usage {
            Some(usage) => CompletionResponse::with_usage(
                message,
                TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
            ),
            None => CompletionResponse::new(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: Option<String>) -> LlmConfig {
        LlmConfig {
            model_provider: "openai".to_string(),
            model: Some("gpt-4o".to_string()),
            temperature: Some(0.0),
            max_tokens: Some(500),
            system_prompt: None,
            base_url,
            api_key: Some("sk-test".to_string()),
        }
    }

    fn echo_tool() -> serde_json::Value {
        serde_json::json!({
            "name": "echo",
            "description": "Echo text back",
            "parameters": {
                "type": "object",
                "properties": { "text": { "type": "string" } }
            }
        })
    }

    #[test]
    fn test_defaults() {
        let mut cfg = config(None);
        cfg.model = None;
        let provider = OpenAiProvider::new(&cfg).unwrap();
        assert_eq!(provider.model(), DEFAULT_OPENAI_MODEL);
        assert_eq!(provider.base_url(), DEFAULT_OPENAI_BASE_URL);
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let provider = OpenAiProvider::new(&config(None)).unwrap();
        assert!(!format!("{:?}", provider).contains("sk-test"));
    }

    #[test]
    fn test_convert_messages_keeps_tool_call_ids() {
        let provider = OpenAiProvider::new(&config(None)).unwrap();
        let messages = vec![
            Message::system("Be brief"),
            Message::user("Echo hi"),
            Message::assistant_with_tools(vec![ToolCall {
                id: "call_1".to_string(),
                function: FunctionCall {
                    name: "echo".to_string(),
                    arguments: r#"{"text":"hi"}"#.to_string(),
                },
            }]),
            Message::tool_result("call_1", "hi"),
        ];

        let converted = provider.convert_messages(&messages);
        assert_eq!(converted.len(), 4);
        assert!(converted[2].content.is_none());
        assert_eq!(converted[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_complete_text_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "max_tokens": 500,
                "tools": [{ "type": "function", "function": { "name": "echo" } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": { "role": "assistant", "content": "Hello!" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(Some(server.uri()))).unwrap();
        let response = provider
            .complete(&[Message::user("Hi")], &[echo_tool()])
            .await
            .unwrap();

        assert_eq!(response.message.content.as_deref(), Some("Hello!"));
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }

    #[tokio::test]
    async fn test_complete_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": { "name": "echo", "arguments": "{\"text\":\"hi\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(Some(server.uri()))).unwrap();
        let response = provider
            .complete(&[Message::user("Echo hi")], &[echo_tool()])
            .await
            .unwrap();

        let calls = response.message.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].function.name, "echo");
        assert_eq!(calls[0].function.arguments, r#"{"text":"hi"}"#);
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn test_complete_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(Some(server.uri()))).unwrap();
        let err = provider
            .complete(&[Message::user("Hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OpenAI returned error 401"), "{err}");
    }

    #[tokio::test]
    async fn test_complete_without_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&config(Some(server.uri()))).unwrap();
        let err = provider
            .complete(&[Message::user("Hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No choices"), "{err}");
    }
}
