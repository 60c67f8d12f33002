//! healing-run - run one task against a worker process
//!
//! The worker command is spawned once per attempt and receives
//! `{"instruction", "history"}` as JSON on stdin.

use anyhow::Context;
use clap::Parser;
use healing::execution::{CommandWorker, TracingProgress};
use healing::{EngineConfig, Task, TaskRunner};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "healing-run")]
#[command(about = "Run a task with retries, context compression and fallback answers", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Instruction to run
    instruction: String,

    /// Chat or session identifier
    #[arg(short, long, default_value = "cli")]
    session: String,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "HEALING_CONFIG")]
    config: Option<PathBuf>,

    /// Override the attempt budget
    #[arg(short = 'n', long)]
    max_attempts: Option<u32>,

    /// Kill a worker attempt after this many seconds
    #[arg(short = 't', long)]
    worker_timeout_secs: Option<u64>,

    /// Worker command and its arguments
    #[arg(last = true, required = true)]
    worker: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(rust_log))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::from_env()?,
    };
    if let Some(max_attempts) = cli.max_attempts {
        config = config.with_max_attempts(max_attempts);
        config.validate()?;
    }

    let (program, args) = cli
        .worker
        .split_first()
        .context("a worker command is required after --")?;
    let mut worker = CommandWorker::new(program.clone()).args(args.iter().cloned());
    if let Some(secs) = cli.worker_timeout_secs {
        worker = worker.with_timeout(Duration::from_secs(secs));
    }

    let runner = TaskRunner::new(worker, config.clone());
    let task = Task::from_config(cli.instruction, cli.session, &config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling task");
            on_signal.cancel();
        }
    });

    let outcome = runner.run_with(&task, &TracingProgress, &cancel).await;
    println!("{}", outcome.text());

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
