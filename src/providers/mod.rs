//! Provider module for mcp-chat
//!
//! This module contains the LLM provider abstraction and implementations
//! for OpenAI, Anthropic and Ollama.

pub mod anthropic;
pub mod base;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use base::{
    validate_message_sequence, CompletionResponse, FunctionCall, Message, Provider, TokenUsage,
    ToolCall,
};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::config::{LlmConfig, SUPPORTED_PROVIDERS};
use crate::error::{ChatError, Result};

/// Create a provider instance based on configuration
///
/// The provider name is matched case-insensitively.
///
/// # Errors
///
/// Returns error if the provider is unknown, credentials are missing, or
/// initialization fails
///
/// # Examples
///
/// ```
/// use mcp_chat::config::LlmConfig;
/// use mcp_chat::providers::create_provider;
///
/// let config = LlmConfig {
///     model_provider: "Ollama".to_string(),
///     model: None,
///     temperature: Some(0.0),
///     max_tokens: None,
///     system_prompt: None,
///     base_url: None,
///     api_key: None,
/// };
/// let provider = create_provider(&config).unwrap();
/// assert_eq!(provider.name(), "ollama");
/// ```
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn Provider>> {
    match config.provider_name().as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        "anthropic" => Ok(Box::new(AnthropicProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => Err(ChatError::Provider(format!(
            "Unknown provider type: {} (supported: {})",
            other,
            SUPPORTED_PROVIDERS.join(", ")
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            model_provider: provider.to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            base_url: None,
            api_key: api_key.map(str::to_string),
        }
    }

    #[test]
    fn test_create_each_provider() {
        let openai = create_provider(&config("openai", Some("sk-1"))).unwrap();
        assert_eq!(openai.name(), "openai");
        assert_eq!(openai.model(), openai::DEFAULT_OPENAI_MODEL);

        let anthropic = create_provider(&config("ANTHROPIC", Some("sk-2"))).unwrap();
        assert_eq!(anthropic.name(), "anthropic");

        let ollama = create_provider(&config("ollama", None)).unwrap();
        assert_eq!(ollama.name(), "ollama");
    }

    #[test]
    fn test_create_provider_invalid_type() {
        let result = create_provider(&config("invalid", None));
        let err = result.err().unwrap().to_string();
        assert!(err.contains("Unknown provider type: invalid"), "{err}");
        assert!(err.contains("openai, anthropic, ollama"), "{err}");
    }
}
