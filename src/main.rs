#![forbid(unsafe_code)]

//! `evals-runner`: runs one eval task against an editor-hosted agent.
//!
//! Bootstraps configuration and the database, runs the task orchestrator,
//! and streams the published task events to stdout as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use evals_runner::config::GlobalConfig;
use evals_runner::models::event::PublishedEvent;
use evals_runner::orchestrator::TaskOrchestrator;
use evals_runner::persistence::db;
use evals_runner::persistence::run_repo::RunRepo;
use evals_runner::persistence::task_repo::TaskRepo;
use evals_runner::publish::{BroadcastPublisher, EventPublisher};
use evals_runner::tasklog::{JsonlTaskLogger, TaskLogger};
use evals_runner::{AppError, Result};

/// Buffered events per subscriber before the stdout forwarder lags.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "evals-runner", about = "Run one eval task against an editor-hosted agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Identifier of the task to run.
    #[arg(long)]
    task_id: i64,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("evals-runner bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    let task = TaskRepo::new(Arc::clone(&db)).get_by_id(args.task_id).await?;
    let run = RunRepo::new(Arc::clone(&db)).get_by_id(task.run_id).await?;

    // ── Event sinks ─────────────────────────────────────
    let publisher = BroadcastPublisher::new(EVENT_BUFFER);
    let forwarder = tokio::spawn(forward_events(publisher.subscribe()));
    let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);

    let logger: Arc<dyn TaskLogger> = Arc::new(JsonlTaskLogger::for_task(
        &config.log_dir(),
        run.id,
        &task.language,
        &task.exercise,
    )?);

    // ── Run the task ────────────────────────────────────
    let orchestrator = TaskOrchestrator::new(Arc::clone(&config), db, publisher, logger);

    let result = tokio::select! {
        outcome = orchestrator.run_task(&run, &task) => outcome.map(Some),
        () = shutdown_signal() => {
            warn!("shutdown signal received, abandoning task");
            Ok(None)
        }
    };

    // Dropping the orchestrator closes the broadcast channel.
    drop(orchestrator);
    if let Err(err) = forwarder.await {
        warn!(%err, "event forwarder failed");
    }

    match result {
        Ok(Some(outcome)) => {
            info!(
                reason = ?outcome.reason,
                process = ?outcome.process,
                metrics_id = ?outcome.state.task_metrics_id,
                "task finished"
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            error!(%err, "task failed");
            Err(err)
        }
    }
}

/// Write every published event to stdout as one JSON line.
async fn forward_events(mut events: broadcast::Receiver<PublishedEvent>) {
    let mut stdout = tokio::io::stdout();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "stdout forwarder lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "failed to serialize event");
                continue;
            }
        };
        line.push('\n');

        if let Err(err) = stdout.write_all(line.as_bytes()).await {
            warn!(%err, "failed to write event to stdout");
            break;
        }
    }

    if let Err(err) = stdout.flush().await {
        warn!(%err, "failed to flush stdout");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the event stream, so diagnostics go to stderr.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
