use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use feed_pipeline::config::SchedulerConfig;
use feed_pipeline::jobs;
use feed_pipeline::scheduler::{JobScheduler, RoundSummary};

/// Feed pipeline scheduler.
#[derive(Parser)]
#[command(name = "feed-pipeline")]
#[command(about = "Dependency-aware cron scheduler for the feed pipeline")]
#[command(version)]
struct Cli {
    /// Pipeline definition file (JSON)
    #[arg(
        short,
        long,
        env = "PIPELINE_JOBS_FILE",
        default_value = "pipeline.json",
        global = true
    )]
    jobs: PathBuf,

    /// Also write logs to daily files in this directory
    #[arg(long, env = "PIPELINE_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted (default)
    Run {
        /// Run one round immediately instead of waiting for the first tick
        #[arg(long)]
        immediate: bool,
    },

    /// Run a single round now and print the results as JSON
    Once,

    /// Validate the pipeline file and print the execution order
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref())?;

    let config = SchedulerConfig::from_env().context("invalid scheduler environment")?;
    let scheduler = JobScheduler::new(config);
    let client = reqwest::Client::new();
    jobs::load_pipeline(&scheduler, &cli.jobs, &client)
        .await
        .with_context(|| format!("failed to load pipeline {}", cli.jobs.display()))?;

    match cli.command.unwrap_or(Commands::Run { immediate: false }) {
        Commands::Run { immediate } => run(scheduler, immediate).await,
        Commands::Once => once(&scheduler).await,
        Commands::Check => check(&scheduler).await,
    }
}

async fn run(scheduler: Arc<JobScheduler>, immediate: bool) -> anyhow::Result<ExitCode> {
    eprintln!("📰 Feed pipeline v{}", env!("CARGO_PKG_VERSION"));
    for schedule in scheduler.schedules().await {
        eprintln!(
            "   {} → {} (next: {})",
            schedule.expression,
            schedule.jobs.join(", "),
            schedule
                .next_fire
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
        );
    }

    if immediate || scheduler.config().run_on_start {
        let results = scheduler.start_with_immediate_execution().await;
        eprintln!("   Initial round: {}", RoundSummary::from_results(&results));
    } else {
        scheduler.start().await;
    }

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    scheduler.stop().await;
    if scheduler.is_executing() {
        tracing::warn!("Exiting while a round is still running");
    }
    Ok(ExitCode::SUCCESS)
}

/// Exits non-zero when any job failed or was skipped.
async fn once(scheduler: &JobScheduler) -> anyhow::Result<ExitCode> {
    let results = scheduler.execute_round().await;
    let summary = RoundSummary::from_results(&results);
    let report = serde_json::json!({ "summary": summary, "results": results });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn check(scheduler: &JobScheduler) -> anyhow::Result<ExitCode> {
    let order = scheduler.resolve_order().await?;
    println!("Execution order:");
    for (i, name) in order.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, name);
    }
    println!("Schedules:");
    for schedule in scheduler.schedules().await {
        println!("  {:<16} {}", schedule.expression, schedule.jobs.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "feed-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
