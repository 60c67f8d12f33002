//! Task definition
//!
//! A task is the immutable input of one run: the instruction, the chat it came
//! from, its attempt budget and an optional deadline.

use crate::config::EngineConfig;
use crate::messages::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user request to drive to completion
///
/// Builder methods consume the task, so a task handed to the runner can no
/// longer change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    instruction: String,
    session_id: String,
    max_attempts: u32,
    deadline: Option<DateTime<Utc>>,
    seed_messages: Vec<Message>,
    created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with the default attempt budget
    pub fn new(instruction: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            instruction: instruction.into(),
            session_id: session_id.into(),
            max_attempts: EngineConfig::default().max_attempts,
            deadline: None,
            seed_messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a task whose attempt budget comes from configuration
    pub fn from_config(
        instruction: impl Into<String>,
        session_id: impl Into<String>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(instruction, session_id).with_max_attempts(config.max_attempts)
    }

    /// Set the attempt budget (at least one attempt is always allowed)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set a wall-clock deadline
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Seed the history, typically from the session store
    pub fn with_seed_messages(mut self, messages: Vec<Message>) -> Self {
        self.seed_messages = messages;
        self
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Natural-language instruction
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Chat or session the task belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Maximum worker invocations
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Caller-supplied deadline
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// History the first attempt starts from
    ///
    /// Falls back to a single user message carrying the instruction.
    pub fn initial_history(&self) -> Vec<Message> {
        if self.seed_messages.is_empty() {
            vec![Message::user(self.instruction.clone())]
        } else {
            self.seed_messages.clone()
        }
    }

    /// Whether the deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }
}
