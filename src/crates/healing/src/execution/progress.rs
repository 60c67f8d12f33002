//! Progress reporting
//!
//! The runner reports lifecycle changes to a [`ProgressSink`] handed to each
//! run. Sinks are best effort: the runner logs and ignores their errors.

use crate::task::TaskId;
use crate::{HealingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Accepted, not yet dispatched
    Planning,
    /// An attempt is running or about to run
    Executing,
    /// Finished with an answer from the worker
    Completed,
    /// Finished with a fallback
    Failed,
}

impl ProgressStatus {
    /// Whether no further updates follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::Planning => write!(f, "planning"),
            ProgressStatus::Executing => write!(f, "executing"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Task the update belongs to
    pub task_id: TaskId,
    /// New status
    pub status: ProgressStatus,
    /// Attempt index (0-based)
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Free-form detail
    pub detail: Option<String>,
    /// Time since the run started
    pub elapsed: Duration,
    /// When the update was produced
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Create an update
    pub fn new(task_id: TaskId, status: ProgressStatus, attempt: u32, max_attempts: u32) -> Self {
        Self {
            task_id,
            status,
            attempt,
            max_attempts,
            detail: None,
            elapsed: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Set detail text
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set elapsed time
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Human-readable one-liner, e.g. `executing (attempt 2/3, 1m 5s): retrying`
    pub fn render(&self) -> String {
        let mut line = format!(
            "{} (attempt {}/{}, {})",
            self.status,
            self.attempt.saturating_add(1).min(self.max_attempts.max(1)),
            self.max_attempts,
            format_duration(self.elapsed)
        );
        if let Some(detail) = &self.detail {
            line.push_str(": ");
            line.push_str(detail);
        }
        line
    }
}

impl std::fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// `45s`, `2m 30s`, `1h 5m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3_600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60)
    }
}

/// Receiver of progress updates
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Deliver one update
    async fn notify(&self, update: ProgressUpdate) -> Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn notify(&self, _update: ProgressUpdate) -> Result<()> {
        Ok(())
    }
}

/// Sink that writes structured log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

#[async_trait]
impl ProgressSink for TracingProgress {
    async fn notify(&self, update: ProgressUpdate) -> Result<()> {
        if update.status.is_terminal() {
            info!(
                task_id = %update.task_id,
                status = %update.status,
                attempt = update.attempt,
                max_attempts = update.max_attempts,
                elapsed_ms = update.elapsed.as_millis() as u64,
                "{}",
                update.render()
            );
        } else {
            debug!(
                task_id = %update.task_id,
                status = %update.status,
                attempt = update.attempt,
                max_attempts = update.max_attempts,
                "{}",
                update.render()
            );
        }
        Ok(())
    }
}

/// Stream of progress updates
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressUpdate> + Send>>;

/// Sink that forwards updates into a bounded channel
///
/// The receiving half is exposed as a [`Stream`]. When the buffer is full,
/// `notify` waits for the consumer.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ChannelProgress {
    /// Create a sink and the stream that receives its updates
    pub fn new(buffer_size: usize) -> (Self, ProgressStream) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let stream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));
        (Self { tx }, stream)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgress {
    async fn notify(&self, update: ProgressUpdate) -> Result<()> {
        self.tx
            .send(update)
            .await
            .map_err(|_| HealingError::ProgressClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(150)), "2m 30s");
        assert_eq!(format_duration(Duration::from_secs(3_900)), "1h 5m");
    }

    #[test]
    fn test_render() {
        let update = ProgressUpdate::new(TaskId::new(), ProgressStatus::Executing, 1, 3)
            .with_detail("retrying after rate limit")
            .with_elapsed(Duration::from_secs(65));

        assert_eq!(update.render(), "executing (attempt 2/3, 1m 5s): retrying after rate limit");
        assert_eq!(update.to_string(), update.render());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ProgressStatus::Planning.is_terminal());
        assert!(!ProgressStatus::Executing.is_terminal());
        assert!(ProgressStatus::Completed.is_terminal());
        assert!(ProgressStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_channel_progress_streams_updates() {
        let (sink, mut stream) = ChannelProgress::new(8);
        let id = TaskId::new();

        sink.notify(ProgressUpdate::new(id, ProgressStatus::Planning, 0, 3))
            .await
            .unwrap();
        sink.notify(ProgressUpdate::new(id, ProgressStatus::Completed, 0, 3))
            .await
            .unwrap();
        drop(sink);

        let statuses: Vec<_> = stream.by_ref().map(|u| u.status).collect().await;
        assert_eq!(statuses, vec![ProgressStatus::Planning, ProgressStatus::Completed]);
    }

    #[tokio::test]
    async fn test_channel_progress_closed() {
        let (sink, stream) = ChannelProgress::new(1);
        drop(stream);

        let result = sink
            .notify(ProgressUpdate::new(TaskId::new(), ProgressStatus::Planning, 0, 1))
            .await;
        assert!(matches!(result, Err(HealingError::ProgressClosed)));
    }

    #[tokio::test]
    async fn test_noop_and_tracing_accept_everything() {
        let update = ProgressUpdate::new(TaskId::new(), ProgressStatus::Failed, 2, 3);
        assert!(NoopProgress.notify(update.clone()).await.is_ok());
        assert!(TracingProgress.notify(update).await.is_ok());
    }
}
