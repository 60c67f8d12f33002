//! Task execution
//!
//! The worker seam, per-task state, progress reporting and the runner that
//! ties them to the recovery components.

pub mod progress;
pub mod runner;
pub mod state;
pub mod worker;

pub use progress::{
    format_duration, ChannelProgress, NoopProgress, ProgressSink, ProgressStatus, ProgressStream,
    ProgressUpdate, TracingProgress,
};
pub use runner::TaskRunner;
pub use state::{AttemptState, Outcome};
pub use worker::{CommandWorker, Worker, WorkerError, WorkerFailure, WorkerOutput};
