//! Conversation history for the chat agent
//!
//! A [`Conversation`] is the ordered list of messages sent to the provider.
//! The agent works on a scratch copy during a query and commits only the
//! user query and final answer back, so tool traffic never accumulates here.

use crate::providers::{Message, TokenUsage, ToolCall};

/// Ordered message history with a rough token estimate
///
/// Token counting uses a characters / 4 heuristic. Provider-reported usage
/// is tracked separately and preferred for reporting when present.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    token_count: usize,
    provider_token_usage: Option<TokenUsage>,
}

impl Conversation {
    /// Creates a conversation, seeded with a system message when given
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_chat::agent::Conversation;
    ///
    /// let conversation = Conversation::new(Some("You are terse."));
    /// assert_eq!(conversation.len(), 1);
    /// assert_eq!(conversation.messages()[0].role, "system");
    ///
    /// assert!(Conversation::new(None).is_empty());
    /// ```
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut conversation = Self::default();
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            conversation.add_system_message(prompt);
        }
        conversation
    }

    /// Adds a user message to the conversation
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    /// Adds an assistant message to the conversation
    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// Adds the assistant turn that requested `tool_calls`
    ///
    /// Any text the model produced alongside the calls is kept.
    pub fn add_assistant_tool_calls(&mut self, content: Option<String>, tool_calls: Vec<ToolCall>) {
        let mut message = Message::assistant_with_tools(tool_calls);
        message.content = content;
        self.push(message);
    }

    /// Adds a tool result message to the conversation
    pub fn add_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.push(Message::tool_result(tool_call_id, content));
    }

    /// Adds a system message to the conversation
    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.push(Message::system(content));
    }

    fn push(&mut self, message: Message) {
        self.token_count += estimate_tokens(&message);
        self.messages.push(message);
    }

    /// All messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The most recent message, if any
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Estimated token count of the history
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_chat::agent::Conversation;
    ///
    /// let mut conversation = Conversation::new(None);
    /// conversation.add_user_message("Test message");
    /// assert!(conversation.token_count() > 0);
    /// ```
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Returns the number of messages in the conversation
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the conversation has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Accumulate provider-reported token usage
    pub fn update_from_provider_usage(&mut self, usage: &TokenUsage) {
        let total = self.provider_token_usage.get_or_insert_with(TokenUsage::default);
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
    }

    /// Usage reported by the provider so far, if it reports any
    pub fn provider_token_usage(&self) -> Option<TokenUsage> {
        self.provider_token_usage
    }
}

/// characters / 4, counting content and tool-call arguments
fn estimate_tokens(message: &Message) -> usize {
    let mut chars = message.content.as_deref().map_or(0, str::len);
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            chars += call.function.name.len() + call.function.arguments.len();
        }
    }
    (chars + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FunctionCall;

    #[test]
    fn test_new_ignores_blank_system_prompt() {
        assert!(Conversation::new(Some("   ")).is_empty());
    }

    #[test]
    fn test_messages_are_kept_in_order() {
        let mut conversation = Conversation::new(Some("system"));
        conversation.add_user_message("question");
        conversation.add_assistant_tool_calls(
            None,
            vec![ToolCall {
                id: "call_1".to_string(),
                function: FunctionCall {
                    name: "echo".to_string(),
                    arguments: "{}".to_string(),
                },
            }],
        );
        conversation.add_tool_result("call_1", "echoed");
        conversation.add_assistant_message("answer");

        let roles: Vec<&str> = conversation
            .messages()
            .iter()
            .map(|m| m.role.as_str())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool", "assistant"]);
        assert_eq!(conversation.last().unwrap().content.as_deref(), Some("answer"));
    }

    #[test]
    fn test_token_estimate_includes_tool_arguments() {
        let mut conversation = Conversation::new(None);
        conversation.add_assistant_tool_calls(
            Some("ok".to_string()),
            vec![ToolCall {
                id: "call_1".to_string(),
                function: FunctionCall {
                    name: "abcd".to_string(),
                    arguments: "efghijkl".to_string(),
                },
            }],
        );
        // 2 + 4 + 8 = 14 chars
        assert_eq!(conversation.token_count(), 4);
    }

    #[test]
    fn test_provider_usage_accumulates() {
        let mut conversation = Conversation::new(None);
        assert!(conversation.provider_token_usage().is_none());

        conversation.update_from_provider_usage(&TokenUsage::new(10, 5));
        conversation.update_from_provider_usage(&TokenUsage::new(20, 1));

        let usage = conversation.provider_token_usage().unwrap();
        assert_eq!(usage.prompt_tokens, 30);
        assert_eq!(usage.completion_tokens, 6);
        assert_eq!(usage.total_tokens, 36);
    }
}
