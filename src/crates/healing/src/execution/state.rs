//! Per-task execution state and the final outcome

use crate::messages::{Message, MessageRole};
use crate::recovery::ClassifiedError;
use std::time::Duration;
use tokio::time::Instant;

/// Mutable state of one task run
///
/// Owned by the runner for the duration of a single `run` call.
#[derive(Debug, Clone)]
pub struct AttemptState {
    attempt: u32,
    messages: Vec<Message>,
    tools_used: Vec<String>,
    started: Instant,
    last_error: Option<ClassifiedError>,
    backoffs: Vec<Duration>,
    invocations: u32,
}

impl AttemptState {
    /// Fresh state starting from `history`
    pub fn new(history: Vec<Message>) -> Self {
        let mut state = Self {
            attempt: 0,
            messages: Vec::new(),
            tools_used: Vec::new(),
            started: Instant::now(),
            last_error: None,
            backoffs: Vec::new(),
            invocations: 0,
        };
        state.record_messages(history);
        state
    }

    /// Current attempt index (0-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Conversation history
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Tools invoked so far, deduplicated, first use first
    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Classification of the most recent failure
    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.last_error.as_ref()
    }

    /// Backoff waits performed so far
    pub fn backoffs(&self) -> &[Duration] {
        &self.backoffs
    }

    /// Worker calls made so far
    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    /// Whether nothing has happened yet worth reporting
    pub fn is_empty(&self) -> bool {
        self.invocations == 0
            && self.tools_used.is_empty()
            && !self
                .messages
                .iter()
                .any(|m| m.role == MessageRole::Assistant && !m.is_summary())
    }

    /// Count a worker call
    pub fn begin_attempt(&mut self) {
        self.invocations += 1;
    }

    /// Move on to the next attempt
    pub fn advance(&mut self) {
        self.attempt += 1;
    }

    /// Append messages, noting any tools they record
    pub fn record_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            if let Some(name) = message.tool_name() {
                if !self.tools_used.iter().any(|t| t == name) {
                    self.tools_used.push(name.to_string());
                }
            }
            self.messages.push(message);
        }
    }

    /// Remember the latest failure
    pub fn record_failure(&mut self, error: ClassifiedError) {
        self.last_error = Some(error);
    }

    /// Remember a completed backoff wait
    pub fn record_backoff(&mut self, delay: Duration) {
        self.backoffs.push(delay);
    }

    /// Swap in a compressed history
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }
}

/// Final result of a task
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The worker answered
    Success {
        text: String,
        tools_used: Vec<String>,
        attempts: u32,
        backoffs: Vec<Duration>,
    },
    /// The worker never answered; `fallback` is what the user sees
    Failure {
        fallback: String,
        last_error: ClassifiedError,
        attempts: u32,
        backoffs: Vec<Duration>,
    },
}

impl Outcome {
    /// Text to show the user
    pub fn text(&self) -> &str {
        match self {
            Outcome::Success { text, .. } => text,
            Outcome::Failure { fallback, .. } => fallback,
        }
    }

    /// Whether the worker answered
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Worker invocations made
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. } | Outcome::Failure { attempts, .. } => *attempts,
        }
    }

    /// Backoff waits performed
    pub fn backoffs(&self) -> &[Duration] {
        match self {
            Outcome::Success { backoffs, .. } | Outcome::Failure { backoffs, .. } => backoffs,
        }
    }

    /// Classification of the failure that ended the run
    pub fn last_error(&self) -> Option<&ClassifiedError> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { last_error, .. } => Some(last_error),
        }
    }
}
