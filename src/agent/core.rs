//! Agent core implementation with the tool-calling loop
//!
//! For every user query the agent:
//! - sends the conversation and tool definitions to the provider
//! - executes the tool calls the model asks for and feeds results back
//! - stops at the first reply without tool calls
//! - enforces the turn limit and the per-query timeout

use crate::config::AgentConfig;
use crate::error::{ChatError, Result};
use crate::providers::{Message, Provider, ToolCall};
use crate::tools::{ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::Conversation;

/// Result of one successful query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Final assistant text
    pub response: String,
    /// Tool output the model saw right before answering, if any
    pub last_tool_output: Option<String>,
}

/// The chat agent
///
/// Holds the provider, the tools and the committed history. Tool traffic of
/// a query lives in a scratch copy of the history; only the query and the
/// final answer are committed, and nothing is committed when the query fails.
///
/// # Examples
///
/// ```ignore
/// use mcp_chat::agent::Agent;
/// use mcp_chat::config::AgentConfig;
/// use mcp_chat::tools::ToolRegistry;
///
/// # async fn example() -> mcp_chat::error::Result<()> {
/// # let provider = unimplemented!();
/// let mut agent = Agent::new(provider, ToolRegistry::new(), AgentConfig::default())?
///     .with_system_prompt(Some("Answer briefly."));
/// let outcome = agent.execute("What's the weather in Oslo?").await?;
/// println!("{}", outcome.response);
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    provider: Arc<dyn Provider>,
    conversation: Conversation,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("tools", &self.tools)
            .field("history_len", &self.conversation.len())
            .finish()
    }
}

impl Agent {
    /// Creates a new agent instance
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Config` if `max_turns` or `timeout_seconds` is 0
    pub fn new(
        provider: Box<dyn Provider>,
        tools: ToolRegistry,
        config: AgentConfig,
    ) -> Result<Self> {
        if config.max_turns == 0 {
            return Err(ChatError::Config("max_turns must be greater than 0".to_string()).into());
        }
        if config.timeout_seconds == 0 {
            return Err(
                ChatError::Config("timeout_seconds must be greater than 0".to_string()).into(),
            );
        }

        Ok(Self {
            provider: Arc::from(provider),
            conversation: Conversation::new(None),
            tools,
            config,
        })
    }

    /// Seed the history with a system prompt
    ///
    /// Replaces any history accumulated so far.
    pub fn with_system_prompt(mut self, system_prompt: Option<&str>) -> Self {
        self.conversation = Conversation::new(system_prompt);
        self
    }

    /// Answer one user query, calling tools as the model requests
    ///
    /// # Errors
    ///
    /// - `ChatError::MaxTurnsExceeded` when the model keeps calling tools
    /// - `ChatError::Timeout` when the query runs past `timeout_seconds`
    /// - provider errors, unchanged
    ///
    /// Tool failures are not errors here: they are reported back to the
    /// model as the tool result.
    pub async fn execute(&mut self, query: impl Into<String>) -> Result<AgentOutcome> {
        let query = query.into();
        let start_time = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        info!("Starting agent execution");

        let mut scratch = self.conversation.clone();
        scratch.add_user_message(query.clone());

        let outcome = match tokio::time::timeout(timeout, self.run_loop(&mut scratch)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Agent execution timeout after {:?}", start_time.elapsed());
                return Err(ChatError::Timeout(format!(
                    "Agent execution timeout after {} seconds",
                    self.config.timeout_seconds
                ))
                .into());
            }
        };

        if let Some(usage) = scratch.provider_token_usage() {
            self.conversation.update_from_provider_usage(&usage);
        }
        self.conversation.add_user_message(query);
        self.conversation.add_assistant_message(outcome.response.clone());

        info!(
            "Agent execution completed in {} ms",
            start_time.elapsed().as_millis()
        );

        Ok(outcome)
    }

    async fn run_loop(&self, conversation: &mut Conversation) -> Result<AgentOutcome> {
        let tool_definitions = self.tools.all_definitions();
        let mut turn = 0;

        loop {
            turn += 1;

            if turn > self.config.max_turns {
                warn!("Maximum turns ({}) exceeded", self.config.max_turns);
                return Err(ChatError::MaxTurnsExceeded {
                    limit: self.config.max_turns,
                    message: format!(
                        "Agent exceeded maximum turn limit of {}",
                        self.config.max_turns
                    ),
                }
                .into());
            }

            debug!(
                "Turn {}/{}, estimated tokens: {}",
                turn,
                self.config.max_turns,
                conversation.token_count()
            );

            let completion = self
                .provider
                .complete(conversation.messages(), &tool_definitions)
                .await?;
            if let Some(usage) = &completion.usage {
                conversation.update_from_provider_usage(usage);
            }

            let message = completion.message;
            debug!("Provider response: {:?}", message);

            match message.tool_calls {
                Some(tool_calls) if !tool_calls.is_empty() => {
                    debug!("Executing {} tool calls", tool_calls.len());
                    conversation.add_assistant_tool_calls(message.content, tool_calls.clone());

                    for tool_call in &tool_calls {
                        let result = self.execute_tool_call(tool_call).await;
                        conversation.add_tool_result(&tool_call.id, result.to_message());
                    }
                }
                _ => {
                    let last_tool_output = last_tool_output(conversation.last());
                    let response = message.content.unwrap_or_default();
                    if response.is_empty() {
                        warn!("Provider returned an empty response");
                    }
                    return Ok(AgentOutcome {
                        response,
                        last_tool_output,
                    });
                }
            }
        }
    }

    /// Executes a single tool call
    ///
    /// Never fails: an unknown tool, unparsable arguments or an executor
    /// error all become a failed [`ToolResult`] the model can read.
    async fn execute_tool_call(&self, tool_call: &ToolCall) -> ToolResult {
        let tool_name = &tool_call.function.name;
        debug!("Executing tool: {}", tool_name);

        let Some(tool_executor) = self.tools.get(tool_name) else {
            warn!("Model requested unknown tool: {}", tool_name);
            return ToolResult::error(format!("Tool not found: {}", tool_name));
        };

        let raw_args = tool_call.function.arguments.trim();
        let args: serde_json::Value = if raw_args.is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(raw_args) {
                Ok(args) => args,
                Err(e) => {
                    warn!("Invalid arguments for tool {}: {}", tool_name, e);
                    return ToolResult::error(format!(
                        "Failed to parse tool arguments for '{}': {}",
                        tool_name, e
                    ));
                }
            }
        };

        let result = match tool_executor.execute(args).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Tool '{}' execution failed: {:#}", tool_name, e);
                ToolResult::error(format!("Tool '{}' execution failed: {}", tool_name, e))
            }
        };

        let max_output_size = self.config.max_tool_output_size;
        let truncated_result = result.truncate_if_needed(max_output_size);

        if truncated_result.truncated {
            debug!(
                "Tool '{}' result truncated to {} bytes",
                tool_name, max_output_size
            );
        }

        truncated_result
    }

    /// Committed history
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the number of registered tools
    pub fn num_tools(&self) -> usize {
        self.tools.len()
    }
}

fn last_tool_output(message: Option<&Message>) -> Option<String> {
    message
        .filter(|m| m.role == "tool")
        .and_then(|m| m.content.clone())
}
