//! Conversation messages
//!
//! The history a task accumulates across attempts. Messages are appended while
//! an attempt runs; only the context compressor removes entries, and only
//! between attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of the message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions or context for the worker
    System,
    /// Input from the end user
    User,
    /// Output from the worker
    Assistant,
    /// Result of a tool the worker invoked
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call recorded on a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name (e.g. "read_file", "shell")
    pub name: String,

    /// Arguments the tool was called with
    #[serde(default)]
    pub arguments: Value,

    /// Textual result, if the tool returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolInvocation {
    /// Create a tool invocation with no arguments and no result
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Value::Null,
            result: None,
        }
    }

    /// Set the call arguments
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the tool result
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}

/// Structured content of a synthetic summary message
///
/// Kept alongside the rendered text so a later compression pass can merge
/// summaries without re-parsing prose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDigest {
    /// Number of original messages folded into this summary
    pub folded: usize,
    /// Topics detected in the folded messages, most frequent first
    pub topics: Vec<String>,
    /// Net outcomes of the folded run, oldest first
    pub outcomes: Vec<String>,
}

impl SummaryDigest {
    /// Render the digest as the text the worker will see
    pub fn render(&self) -> String {
        let mut text = format!(
            "[Summary of {} earlier message{}",
            self.folded,
            if self.folded == 1 { "" } else { "s" }
        );
        if !self.topics.is_empty() {
            text.push_str(&format!(". Topics: {}", self.topics.join(", ")));
        }
        if !self.outcomes.is_empty() {
            text.push_str(&format!(". Outcomes: {}", self.outcomes.join("; ")));
        }
        text.push_str(".]");
        text
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Textual content
    #[serde(default)]
    pub content: String,

    /// Tool invocation carried by this message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInvocation>,

    /// Creation timestamp; workers may omit it
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Set only on summaries produced by the context compressor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryDigest>,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool: None,
            created_at: Utc::now(),
            summary: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a tool result message
    ///
    /// The content mirrors the tool result so size estimates and fallbacks see it.
    pub fn tool(invocation: ToolInvocation) -> Self {
        let content = invocation.result.clone().unwrap_or_default();
        Self {
            role: MessageRole::Tool,
            content,
            tool: Some(invocation),
            created_at: Utc::now(),
            summary: None,
        }
    }

    /// Create a synthetic summary message from a digest
    pub fn summary(digest: SummaryDigest) -> Self {
        Self {
            role: MessageRole::System,
            content: digest.render(),
            tool: None,
            created_at: Utc::now(),
            summary: Some(digest),
        }
    }

    /// Override the creation timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether this is a compressor-generated summary
    pub fn is_summary(&self) -> bool {
        self.summary.is_some()
    }

    /// Whether this is a real system message (never dropped by compression)
    pub fn is_pinned(&self) -> bool {
        self.role == MessageRole::System && !self.is_summary()
    }

    /// Name of the tool this message records, if any
    pub fn tool_name(&self) -> Option<&str> {
        self.tool.as_ref().map(|t| t.name.as_str())
    }
}
