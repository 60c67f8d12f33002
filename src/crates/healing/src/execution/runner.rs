//! Task runner
//!
//! Owns the attempt loop for one task: dispatch to the worker, classify a
//! failure, pick a healing action, act on it, and end with exactly one
//! [`Outcome`]. Per-task state lives inside the `run` call, so one runner
//! can serve many tasks concurrently behind an `Arc`.

use crate::config::EngineConfig;
use crate::context::ContextCompressor;
use crate::execution::progress::{ProgressSink, ProgressStatus, ProgressUpdate, TracingProgress};
use crate::execution::state::{AttemptState, Outcome};
use crate::execution::worker::{Worker, WorkerError};
use crate::messages::Message;
use crate::recovery::{select_action, ClassifiedError, ErrorClassifier, FallbackGenerator, HealingAction};
use crate::task::Task;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a backoff wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Elapsed,
    Cancelled,
    DeadlineExceeded,
}

/// Drives tasks to completion against a worker
pub struct TaskRunner {
    worker: Arc<dyn Worker>,
    config: EngineConfig,
    classifier: ErrorClassifier,
    compressor: ContextCompressor,
    fallback: FallbackGenerator,
}

impl TaskRunner {
    /// Create a runner for `worker`
    pub fn new(worker: impl Worker + 'static, config: EngineConfig) -> Self {
        Self::from_arc(Arc::new(worker), config)
    }

    /// Create a runner for a shared worker
    pub fn from_arc(worker: Arc<dyn Worker>, config: EngineConfig) -> Self {
        Self {
            worker,
            classifier: ErrorClassifier::new(config.backoff.clone()),
            compressor: ContextCompressor::from_config(&config),
            fallback: FallbackGenerator::new(),
            config,
        }
    }

    /// Replace the error classifier
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the context compressor
    pub fn with_compressor(mut self, compressor: ContextCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    /// Replace the fallback generator
    pub fn with_fallback(mut self, fallback: FallbackGenerator) -> Self {
        self.fallback = fallback;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a task, logging progress, with no external cancellation
    pub async fn run(&self, task: &Task) -> Outcome {
        self.run_with(task, &TracingProgress, &CancellationToken::new())
            .await
    }

    /// Run a task, reporting to `progress` and stopping when `cancel` fires
    ///
    /// Cancellation is observed before each dispatch and during backoff
    /// waits, never in the middle of a worker call.
    pub async fn run_with(
        &self,
        task: &Task,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Outcome {
        let max_attempts = task.max_attempts();
        let mut state = AttemptState::new(task.initial_history());

        info!(
            task_id = %task.id(),
            session_id = %task.session_id(),
            max_attempts,
            history_len = state.messages().len(),
            "Starting task"
        );
        self.notify(progress, task, &state, ProgressStatus::Planning, None)
            .await;

        loop {
            let attempt = state.attempt();

            if cancel.is_cancelled() {
                return self
                    .terminate(task, state, WorkerError::Cancelled, progress)
                    .await;
            }
            if task.is_expired_at(Utc::now()) {
                return self
                    .terminate(task, state, WorkerError::DeadlineExceeded, progress)
                    .await;
            }

            self.notify(progress, task, &state, ProgressStatus::Executing, None)
                .await;

            let instruction = self.instruction_for(task, &state);
            state.begin_attempt();

            debug!(
                task_id = %task.id(),
                attempt,
                history_len = state.messages().len(),
                "Dispatching to worker"
            );

            let failure = match self.worker.execute(&instruction, state.messages()).await {
                Ok(output) => {
                    state.record_messages(output.messages);
                    state.record_messages([Message::assistant(output.text.clone())]);

                    info!(
                        task_id = %task.id(),
                        attempts = state.invocations(),
                        tools = state.tools_used().len(),
                        "Task completed"
                    );
                    self.notify(progress, task, &state, ProgressStatus::Completed, None)
                        .await;

                    return Outcome::Success {
                        text: output.text,
                        tools_used: state.tools_used().to_vec(),
                        attempts: state.invocations(),
                        backoffs: state.backoffs().to_vec(),
                    };
                }
                Err(failure) => failure,
            };

            state.record_messages(failure.partial);
            let classified = self.classifier.classify_at(failure.error, attempt);
            let action = select_action(&classified, attempt, max_attempts);

            warn!(
                task_id = %task.id(),
                attempt,
                kind = %classified.kind(),
                retryable = classified.retryable(),
                action = ?action,
                "Attempt failed"
            );
            state.record_failure(classified.clone());

            match action {
                HealingAction::RetryNow => {}
                HealingAction::RetryAfter(delay) => {
                    let detail = format!("waiting {}ms after {}", delay.as_millis(), classified.kind().label());
                    self.notify(progress, task, &state, ProgressStatus::Executing, Some(detail))
                        .await;

                    match self.backoff(task, delay, cancel).await {
                        WaitOutcome::Elapsed => state.record_backoff(delay),
                        WaitOutcome::Cancelled => {
                            return self
                                .terminate(task, state, WorkerError::Cancelled, progress)
                                .await;
                        }
                        WaitOutcome::DeadlineExceeded => {
                            return self
                                .terminate(task, state, WorkerError::DeadlineExceeded, progress)
                                .await;
                        }
                    }
                }
                HealingAction::CompressThenRetry => {
                    if !self.compress(task, &mut state) {
                        return self.fail(task, state, classified, progress).await;
                    }
                }
                HealingAction::AbortWithFallback | HealingAction::AbortFatal => {
                    return self.fail(task, state, classified, progress).await;
                }
            }

            state.advance();
        }
    }

    /// Instruction for the next dispatch; retries carry the previous failure
    fn instruction_for(&self, task: &Task, state: &AttemptState) -> String {
        match state.last_error() {
            Some(error) if self.config.annotate_retries && state.attempt() > 0 => {
                self.fallback.retry_instruction(
                    task.instruction(),
                    error,
                    state.attempt() - 1,
                    task.max_attempts(),
                )
            }
            _ => task.instruction().to_string(),
        }
    }

    /// Sleep for `delay` unless cancelled first or the deadline would pass
    async fn backoff(&self, task: &Task, delay: Duration, cancel: &CancellationToken) -> WaitOutcome {
        if let Some(deadline) = task.deadline() {
            let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if delay > remaining {
                debug!(
                    task_id = %task.id(),
                    delay_ms = delay.as_millis() as u64,
                    remaining_ms = remaining.as_millis() as u64,
                    "Backoff would overrun deadline"
                );
                return WaitOutcome::DeadlineExceeded;
            }
        }

        debug!(
            task_id = %task.id(),
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );

        tokio::select! {
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => WaitOutcome::Elapsed,
        }
    }

    /// Compress history toward half its size; false means escalate
    fn compress(&self, task: &Task, state: &mut AttemptState) -> bool {
        let size = self.compressor.estimate(state.messages());
        let target = self.config.context_budget.min(size / 2);
        let result = self.compressor.compress(state.messages(), target);

        info!(
            task_id = %task.id(),
            original_size = result.original_size,
            estimated_size = result.estimated_size,
            target,
            folded = result.folded,
            "Compressed history"
        );

        let exhausted = !result.further_compression_possible
            && (!result.changed() || result.estimated_size > self.config.context_budget);
        if exhausted {
            warn!(
                task_id = %task.id(),
                estimated_size = result.estimated_size,
                "History cannot be compressed further, giving up"
            );
            return false;
        }

        state.replace_history(result.messages);
        true
    }

    /// End the run because of cancellation or the deadline
    async fn terminate(
        &self,
        task: &Task,
        state: AttemptState,
        reason: WorkerError,
        progress: &dyn ProgressSink,
    ) -> Outcome {
        let classified = self.classifier.classify_at(reason, state.attempt());
        info!(
            task_id = %task.id(),
            reason = %classified.detail(),
            "Stopping task"
        );
        self.fail(task, state, classified, progress).await
    }

    /// Build the fallback and finish with a failure
    ///
    /// An interruption reports the worker's last failure, if there was one,
    /// as the outcome's error.
    async fn fail(
        &self,
        task: &Task,
        state: AttemptState,
        error: ClassifiedError,
        progress: &dyn ProgressSink,
    ) -> Outcome {
        let fallback = self.fallback.generate(&state, Some(&error));
        let status_detail = if error.is_interruption() {
            error.detail().to_string()
        } else {
            error.kind().label().to_string()
        };
        let error = match state.last_error() {
            Some(earlier) if error.is_interruption() => earlier.clone(),
            _ => error,
        };

        error!(
            task_id = %task.id(),
            kind = %error.kind(),
            attempts = state.invocations(),
            elapsed_ms = state.elapsed().as_millis() as u64,
            "Task failed"
        );
        self.notify(
            progress,
            task,
            &state,
            ProgressStatus::Failed,
            Some(status_detail),
        )
        .await;

        Outcome::Failure {
            fallback,
            last_error: error,
            attempts: state.invocations(),
            backoffs: state.backoffs().to_vec(),
        }
    }

    async fn notify(
        &self,
        progress: &dyn ProgressSink,
        task: &Task,
        state: &AttemptState,
        status: ProgressStatus,
        detail: Option<String>,
    ) {
        let mut update = ProgressUpdate::new(task.id(), status, state.attempt(), task.max_attempts())
            .with_elapsed(state.elapsed());
        if let Some(detail) = detail {
            update = update.with_detail(detail);
        }

        if let Err(e) = progress.notify(update).await {
            debug!(task_id = %task.id(), error = %e, "Progress notification dropped");
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
