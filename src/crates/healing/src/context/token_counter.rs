//! Token counting for conversation history
//!
//! Estimates how much of the worker's context window a history occupies.
//! The estimate only has to be monotonic and cheap; the worker's own limit is
//! what actually triggers a context overflow.

use crate::messages::Message;

/// Token count result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCount {
    /// Number of tokens
    pub tokens: usize,
    /// Characters counted
    pub chars: usize,
}

impl TokenCount {
    /// Create a new token count
    pub fn new(tokens: usize, chars: usize) -> Self {
        Self { tokens, chars }
    }

    /// Add another token count
    pub fn add(&mut self, other: TokenCount) {
        self.tokens += other.tokens;
        self.chars += other.chars;
    }
}

/// Character-based token estimator
#[derive(Debug, Clone)]
pub struct TokenCounter {
    /// Average tokens per character (~4 chars/token for English)
    tokens_per_char: f32,
    /// Fixed per-message formatting overhead
    message_overhead: usize,
}

impl TokenCounter {
    /// Create a counter with the default ratio
    pub fn new() -> Self {
        Self {
            tokens_per_char: 0.25,
            message_overhead: 4,
        }
    }

    /// Override the tokens-per-character ratio
    pub fn with_tokens_per_char(mut self, ratio: f32) -> Self {
        self.tokens_per_char = ratio.max(0.0);
        self
    }

    /// Override the per-message overhead
    pub fn with_message_overhead(mut self, overhead: usize) -> Self {
        self.message_overhead = overhead;
        self
    }

    /// Count tokens in a text string
    pub fn count_text(&self, text: &str) -> TokenCount {
        let chars = text.chars().count();
        let tokens = (chars as f32 * self.tokens_per_char).ceil() as usize;
        TokenCount::new(tokens, chars)
    }

    /// Count tokens in a message
    ///
    /// Role and formatting overhead, content, and for tool messages the tool
    /// name, arguments and result. A result mirrored verbatim in the content
    /// is counted once.
    pub fn count_message(&self, message: &Message) -> TokenCount {
        let mut total = TokenCount::new(self.message_overhead, 0);
        total.add(self.count_text(&message.content));

        if let Some(tool) = &message.tool {
            total.add(self.count_text(&tool.name));
            if !tool.arguments.is_null() {
                total.add(self.count_text(&tool.arguments.to_string()));
            }
            if let Some(result) = tool.result.as_deref() {
                if result != message.content {
                    total.add(self.count_text(result));
                }
            }
        }

        total
    }

    /// Count tokens in multiple messages
    pub fn count_messages(&self, messages: &[Message]) -> TokenCount {
        let mut total = TokenCount::default();
        for message in messages {
            total.add(self.count_message(message));
        }
        total
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ToolInvocation;
    use serde_json::json;

    #[test]
    fn test_count_text() {
        let counter = TokenCounter::new();
        let count = counter.count_text("Hello, world!");

        // 13 chars at 4 chars/token
        assert_eq!(count.tokens, 4);
        assert_eq!(count.chars, 13);
    }

    #[test]
    fn test_count_text_unicode() {
        let counter = TokenCounter::new();
        // Counted by characters, not bytes
        assert_eq!(counter.count_text("привет").chars, 6);
    }

    #[test]
    fn test_count_message_includes_overhead() {
        let counter = TokenCounter::new();
        let count = counter.count_message(&Message::user("Hello, world!"));
        assert_eq!(count.tokens, 4 + 4);

        let empty = counter.count_message(&Message::user(""));
        assert_eq!(empty.tokens, 4);
    }

    #[test]
    fn test_tool_result_counted_once() {
        let counter = TokenCounter::new();
        let mirrored = Message::tool(ToolInvocation::new("cat").with_result("x".repeat(400)));
        // overhead + 100 content + 1 name
        assert_eq!(counter.count_message(&mirrored).tokens, 4 + 100 + 1);

        let detached: Message = serde_json::from_value(json!({
            "role": "tool",
            "content": "",
            "tool": {"name": "cat", "result": "x".repeat(40_000)}
        }))
        .unwrap();
        assert_eq!(counter.count_message(&detached).tokens, 4 + 1 + 10_000);
    }

    #[test]
    fn test_tool_arguments_are_counted() {
        let counter = TokenCounter::new();
        let bare = Message::tool(ToolInvocation::new("shell").with_result("ok"));
        let with_args = Message::tool(
            ToolInvocation::new("shell")
                .with_arguments(json!({"command": "cargo test --workspace"}))
                .with_result("ok"),
        );

        assert!(counter.count_message(&with_args).tokens > counter.count_message(&bare).tokens);
    }

    #[test]
    fn test_count_messages_sums() {
        let counter = TokenCounter::new();
        let messages = vec![Message::user("Hello!"), Message::assistant("Hi there!")];

        let total = counter.count_messages(&messages);
        let sum = counter.count_message(&messages[0]).tokens + counter.count_message(&messages[1]).tokens;
        assert_eq!(total.tokens, sum);
    }

    #[test]
    fn test_custom_ratio() {
        let counter = TokenCounter::new()
            .with_tokens_per_char(1.0)
            .with_message_overhead(0);
        assert_eq!(counter.count_message(&Message::user("abcd")).tokens, 4);
    }
}
