//! Common test utilities: scripted workers and a recording progress sink

#![allow(dead_code)]

use async_trait::async_trait;
use healing::execution::{ProgressSink, ProgressUpdate};
use healing::{Message, Worker, WorkerError, WorkerFailure, WorkerOutput};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub type Step = Result<WorkerOutput, WorkerFailure>;

/// Worker that plays back a fixed script, then a default step forever
pub struct ScriptedWorker {
    script: Mutex<VecDeque<Step>>,
    otherwise: fn() -> Step,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, usize)>>,
}

impl ScriptedWorker {
    /// Play `script`, then answer "done"
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            otherwise: || reply("done"),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with the error `make` builds
    pub fn failing_forever(make: fn() -> Step) -> Self {
        Self {
            otherwise: make,
            ..Self::new(Vec::new())
        }
    }

    /// Number of `execute` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instructions received, in call order
    pub fn instructions(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(i, _)| i.clone()).collect()
    }

    /// History lengths received, in call order
    pub fn history_sizes(&self) -> Vec<usize> {
        self.seen.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn execute(&self, instruction: &str, history: &[Message]) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((instruction.to_string(), history.len()));

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(self.otherwise)
    }
}

pub fn reply(text: &str) -> Step {
    Ok(WorkerOutput::new(text))
}

pub fn fail(error: WorkerError) -> Step {
    Err(error.into())
}

pub fn rate_limited(retry_after: Option<Duration>) -> WorkerError {
    WorkerError::Http {
        status: 429,
        message: "rate limit exceeded".to_string(),
        retry_after,
    }
}

pub fn overflow() -> WorkerError {
    WorkerError::ContextLength("prompt is too long: 210000 tokens > 200000 maximum".to_string())
}

/// `n` alternating user/assistant turns with some substance
pub fn chat(n: usize) -> Vec<Message> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!(
                    "Step {}: look at the deployment manifests and check the replica counts",
                    i
                ))
            } else {
                Message::assistant(format!(
                    "Step {}: the manifests declare three replicas and the rollout is healthy.",
                    i
                ))
            }
        })
        .collect()
}

/// Progress sink that keeps every update
#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn notify(&self, update: ProgressUpdate) -> healing::Result<()> {
        self.updates.lock().unwrap().push(update);
        Ok(())
    }
}
