//! Resilient task execution engine
//!
//! Drives one user task through repeated attempts against a fallible,
//! LLM-backed worker. Failures are classified, a healing action is selected,
//! oversized conversation history is compressed between attempts, and a
//! readable fallback answer is produced when the worker never succeeds.
//!
//! The pieces, leaf-first:
//!
//! - [`recovery::ErrorClassifier`] labels a [`WorkerError`] with an [`ErrorKind`]
//! - [`context::ContextCompressor`] shrinks message history toward a budget
//! - [`recovery::FallbackGenerator`] writes the best-effort answer
//! - [`recovery::select_action`] is the transition table of the retry loop
//! - [`execution::TaskRunner`] owns the loop and talks to the [`Worker`]
//!
//! ```rust,no_run
//! use healing::{EngineConfig, Task, TaskRunner};
//! use healing::execution::CommandWorker;
//!
//! # async fn demo() {
//! let config = EngineConfig::default();
//! let runner = TaskRunner::new(CommandWorker::new("my-agent"), config.clone());
//! let task = Task::from_config("summarize the repo", "chat-42", &config);
//! let outcome = runner.run(&task).await;
//! println!("{}", outcome.text());
//! # }
//! ```

pub mod config;
pub mod context;
pub mod execution;
pub mod messages;
pub mod recovery;
pub mod task;

pub use config::{BackoffConfig, EngineConfig};
pub use context::{CompressionResult, ContextCompressor, TokenCounter};
pub use execution::{
    AttemptState, Outcome, ProgressSink, ProgressStatus, ProgressUpdate, TaskRunner, Worker,
    WorkerError, WorkerFailure, WorkerOutput,
};
pub use messages::{Message, MessageRole, ToolInvocation};
pub use recovery::{
    select_action, ClassifiedError, ErrorClassifier, ErrorKind, FallbackGenerator, HealingAction,
};
pub use task::{Task, TaskId};

use thiserror::Error;

/// Errors raised by the engine's own plumbing
///
/// Worker failures are not represented here: they are [`WorkerError`]s and
/// always end up inside an [`Outcome`].
#[derive(Debug, Error)]
pub enum HealingError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Progress receiver went away
    #[error("Progress channel closed")]
    ProgressClosed,
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, HealingError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
