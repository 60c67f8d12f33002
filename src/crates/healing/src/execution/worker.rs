//! Worker interface
//!
//! The worker is the opaque reasoning and tool-calling process a task is
//! dispatched to. The runner only sees what it returns: a reply with the
//! tool messages produced on the way, or a typed failure carrying whatever
//! messages were produced before it broke.

use crate::messages::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Failures a worker can report
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Upstream HTTP failure
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Wait requested by the server (`Retry-After`)
        retry_after: Option<Duration>,
    },

    /// The call did not finish in time
    #[error("Worker timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The history no longer fits the model's context window
    #[error("Context length exceeded: {0}")]
    ContextLength(String),

    /// A tool the worker called failed
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// Failure the worker itself marks as worth retrying
    #[error("Transient worker error: {0}")]
    Transient(String),

    /// Untyped failure text
    #[error("{0}")]
    Message(String),

    /// The task was cancelled by the caller
    #[error("Task cancelled")]
    Cancelled,

    /// The task's deadline passed
    #[error("Task deadline exceeded")]
    DeadlineExceeded,

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Successful worker reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    /// Final answer text
    pub text: String,

    /// Tool messages produced while answering, in order
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl WorkerOutput {
    /// Reply with no tool activity
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            messages: Vec::new(),
        }
    }

    /// Attach tool messages
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

/// Failed worker call
#[derive(Debug)]
pub struct WorkerFailure {
    /// What went wrong
    pub error: WorkerError,

    /// Messages produced before the failure
    pub partial: Vec<Message>,
}

impl WorkerFailure {
    /// Failure with partial progress
    pub fn with_partial(error: WorkerError, partial: Vec<Message>) -> Self {
        Self { error, partial }
    }
}

impl From<WorkerError> for WorkerFailure {
    fn from(error: WorkerError) -> Self {
        Self {
            error,
            partial: Vec::new(),
        }
    }
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} partial messages)", self.error, self.partial.len())
    }
}

/// A fallible, non-deterministic executor of instructions
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run one attempt of `instruction` against `history`
    async fn execute(
        &self,
        instruction: &str,
        history: &[Message],
    ) -> Result<WorkerOutput, WorkerFailure>;
}

#[async_trait]
impl<W: Worker + ?Sized> Worker for std::sync::Arc<W> {
    async fn execute(
        &self,
        instruction: &str,
        history: &[Message],
    ) -> Result<WorkerOutput, WorkerFailure> {
        (**self).execute(instruction, history).await
    }
}

/// Request written to a command worker's stdin
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    instruction: &'a str,
    history: &'a [Message],
}

/// Worker backed by an external process
///
/// Each attempt spawns the program, writes `{"instruction", "history"}` as
/// JSON on stdin and reads the reply from stdout. Stdout may be a
/// [`WorkerOutput`] JSON object or plain text. A non-zero exit is a failure
/// described by stderr; any JSON messages on stdout are kept as partial
/// progress.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
    env_vars: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl CommandWorker {
    /// Create a worker that runs `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            timeout: None,
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Kill the process if an attempt takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, instruction: &str, history: &[Message]) -> Result<WorkerOutput, WorkerFailure> {
        let payload = serde_json::to_vec(&CommandRequest {
            instruction,
            history,
        })
        .map_err(|e| WorkerError::Other(e.into()))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env_vars.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            program = %self.program,
            history_len = history.len(),
            instruction_len = instruction.len(),
            "Spawning worker process"
        );

        let mut child = cmd.spawn().map_err(|e| {
            WorkerError::Message(format!("failed to spawn worker '{}': {}", self.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                warn!(error = %e, "Worker closed stdin early");
            }
            // Dropping stdin signals end of input
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| WorkerError::Message(format!("failed to wait for worker: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            debug!(stdout_len = stdout.len(), "Worker process finished");
            return Ok(parse_reply(&stdout));
        }

        let partial = partial_messages(&stdout);
        let message = match stderr.trim() {
            "" => format!("worker exited with {}", output.status),
            text => text.to_string(),
        };

        warn!(
            status = %output.status,
            partial = partial.len(),
            "Worker process failed"
        );

        Err(WorkerFailure::with_partial(WorkerError::Message(message), partial))
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn execute(
        &self,
        instruction: &str,
        history: &[Message],
    ) -> Result<WorkerOutput, WorkerFailure> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(instruction, history))
                .await
                .map_err(|_| WorkerFailure::from(WorkerError::Timeout(limit)))?,
            None => self.run(instruction, history).await,
        }
    }
}

/// JSON reply if stdout is one, plain text otherwise
fn parse_reply(stdout: &str) -> WorkerOutput {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        match serde_json::from_str::<WorkerOutput>(trimmed) {
            Ok(reply) => return reply,
            Err(e) => debug!(error = %e, "Worker reply looks like JSON but does not parse, using it as text"),
        }
    }
    WorkerOutput::new(trimmed)
}

/// Messages a failed worker reported on stdout before exiting
fn partial_messages(stdout: &str) -> Vec<Message> {
    let trimmed = stdout.trim();
    if !trimmed.starts_with('{') {
        return Vec::new();
    }
    match serde_json::from_str::<WorkerOutput>(trimmed) {
        Ok(reply) => reply.messages,
        Err(e) => {
            debug!(error = %e, "Discarding unparseable partial output from failed worker");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageRole, ToolInvocation};

    #[test]
    fn test_parse_plain_reply() {
        let reply = parse_reply("  all done\n");
        assert_eq!(reply.text, "all done");
        assert!(reply.messages.is_empty());
    }

    #[test]
    fn test_parse_json_reply() {
        let tool = Message::tool(ToolInvocation::new("shell").with_result("ok"));
        let json = serde_json::to_string(&WorkerOutput::new("done").with_messages(vec![tool])).unwrap();

        let reply = parse_reply(&json);
        assert_eq!(reply.text, "done");
        assert_eq!(reply.messages.len(), 1);
        assert_eq!(reply.messages[0].role, MessageRole::Tool);
    }

    #[test]
    fn test_json_reply_without_timestamps() {
        let reply = parse_reply(
            r#"{"text":"done","messages":[{"role":"tool","content":"ok","tool":{"name":"shell","result":"ok"}}]}"#,
        );
        assert_eq!(reply.text, "done");
        assert_eq!(reply.messages.len(), 1);
        assert_eq!(reply.messages[0].tool_name(), Some("shell"));
    }

    #[test]
    fn test_partial_messages_from_failed_worker() {
        let partial = partial_messages(r#"{"text":"","messages":[{"role":"tool","tool":{"name":"git"}}]}"#);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].tool_name(), Some("git"));
        assert!(partial_messages("Traceback: boom").is_empty());
    }

    #[test]
    fn test_malformed_json_is_text() {
        let reply = parse_reply("{not json");
        assert_eq!(reply.text, "{not json");
    }

    #[test]
    fn test_failure_from_error() {
        let failure = WorkerFailure::from(WorkerError::Cancelled);
        assert!(failure.partial.is_empty());
        assert_eq!(failure.to_string(), "Task cancelled (0 partial messages)");
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::Http {
            status: 429,
            message: "slow down".into(),
            retry_after: None,
        };
        assert_eq!(err.to_string(), "HTTP 429: slow down");

        let err = WorkerError::Tool {
            tool: "shell".into(),
            message: "exit 2".into(),
        };
        assert_eq!(err.to_string(), "Tool 'shell' failed: exit 2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_worker_echoes_stdin() {
        // `cat` answers with the request itself, which is not a WorkerOutput
        let worker = CommandWorker::new("cat");
        let reply = worker
            .execute("say hi", &[Message::user("say hi")])
            .await
            .unwrap();

        let echoed: serde_json::Value = serde_json::from_str(&reply.text).unwrap();
        assert_eq!(echoed["instruction"], "say hi");
        assert_eq!(echoed["history"][0]["role"], "user");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_worker_json_reply_keeps_tools() {
        let worker = CommandWorker::new("sh").arg("-c").arg(
            r#"cat > /dev/null; echo '{"text":"done","messages":[{"role":"tool","content":"ok","tool":{"name":"shell","result":"ok"}}]}'"#,
        );

        let reply = worker.execute("x", &[]).await.unwrap();
        assert_eq!(reply.text, "done");
        assert_eq!(reply.messages.len(), 1);
        assert_eq!(reply.messages[0].tool_name(), Some("shell"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_worker_failure_keeps_partial() {
        let worker = CommandWorker::new("sh").arg("-c").arg(
            r#"cat > /dev/null; echo '{"text":"","messages":[{"role":"tool","content":"cloned","tool":{"name":"git"}}]}'; echo 'connection reset' >&2; exit 1"#,
        );

        let failure = worker.execute("x", &[]).await.unwrap_err();
        assert_eq!(failure.partial.len(), 1);
        assert_eq!(failure.partial[0].tool_name(), Some("git"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_worker_failure_uses_stderr() {
        let worker = CommandWorker::new("sh")
            .arg("-c")
            .arg("cat > /dev/null; echo 'rate limit, retry in 2s' >&2; exit 3");

        let failure = worker.execute("x", &[]).await.unwrap_err();
        match failure.error {
            WorkerError::Message(text) => assert_eq!(text, "rate limit, retry in 2s"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_worker_timeout() {
        let worker = CommandWorker::new("sleep")
            .arg("5")
            .with_timeout(Duration::from_millis(50));

        let failure = worker.execute("x", &[]).await.unwrap_err();
        assert!(matches!(failure.error, WorkerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let worker = CommandWorker::new("definitely-not-a-real-worker-binary");
        let failure = worker.execute("x", &[]).await.unwrap_err();
        assert!(failure.error.to_string().contains("failed to spawn"));
    }
}
