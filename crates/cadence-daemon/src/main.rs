use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence_core::CadenceConfig;
use cadence_scheduler::schedule::{estimate_next_run, ScheduleResolver};
use cadence_scheduler::timezone::detect_timezone;
use cadence_scheduler::{NextRun, SchedulerEngine, ThreadRandom};
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod cli;
mod error;
mod history;
mod notify;
mod router;
mod task;

use cli::{Cli, Command};
use history::RunHistory;
use notify::WebhookNotifier;
use router::{ReportRouter, REPORT_BUFFER};
use task::ShellTask;

/// How long shutdown waits for pending reports to be recorded and delivered.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .init();

    // load config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config = CadenceConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command() {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Plan => plan(&config),
        Command::History { limit } => history(&config, limit),
    }
}

/// Start the scheduler and keep it running until Ctrl-C.
async fn run(config: CadenceConfig) -> anyhow::Result<ExitCode> {
    let (engine, router) = build_engine(&config)?;

    if !engine.start() {
        error!("scheduler not started; check the [schedule] section");
        return Ok(ExitCode::FAILURE);
    }
    info!(version = env!("CADENCE_GIT_SHA"), "cadence running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    engine.stop();
    if engine.status().is_running {
        info!("waiting for the current run to finish");
    }
    engine.wait_idle().await;
    drain(engine, router).await;
    Ok(ExitCode::SUCCESS)
}

/// Run the task once now, with the configured retry policy.
async fn once(config: CadenceConfig) -> anyhow::Result<ExitCode> {
    let (engine, router) = build_engine(&config)?;

    let outcome = engine.trigger_now().await;
    drain(engine, router).await;

    println!("{outcome}");
    if let Some(err) = outcome.error() {
        println!("{err}");
    }
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print the resolved trigger without arming anything.
fn plan(config: &CadenceConfig) -> anyhow::Result<ExitCode> {
    let timezone = detect_timezone(config.timezone.as_deref());
    if !config.schedule.enabled {
        println!("schedule disabled");
        return Ok(ExitCode::SUCCESS);
    }

    let resolver = ScheduleResolver::new(Arc::new(ThreadRandom));
    let trigger = resolver.resolve(&config.schedule)?;
    let next = match estimate_next_run(&trigger, &timezone, None, Utc::now()) {
        NextRun::At { at } => at.with_timezone(&timezone).to_rfc3339(),
        NextRun::Undetermined => "undetermined (not a simple daily time)".to_string(),
        NextRun::Unscheduled => "unscheduled".to_string(),
    };

    println!("schedule:   {}", trigger.display_time);
    println!("expression: {}", trigger.expression);
    println!("offset:     {:+} min", trigger.applied_offset_minutes);
    println!("timezone:   {}", timezone.name());
    println!("next run:   {next}");
    if config.schedule.jitter.is_active() {
        println!("note:       offset is drawn again on start and after every run");
    }
    Ok(ExitCode::SUCCESS)
}

fn history(config: &CadenceConfig, limit: usize) -> anyhow::Result<ExitCode> {
    ensure_parent_dir(&config.database.path);
    let history = RunHistory::open(&config.database.path)?;
    let entries = history.recent(limit)?;

    if entries.is_empty() {
        println!("no runs recorded");
    }
    for entry in entries {
        let error = entry
            .error
            .map(|e| format!("  {e}"))
            .unwrap_or_default();
        println!(
            "{}  {:<9}  {:<9}  attempts={}{}",
            entry.started_at,
            entry.trigger.to_string(),
            entry.outcome,
            entry.attempts,
            error
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Engine wired to the shell task, with reports flowing to history and webhook.
fn build_engine(config: &CadenceConfig) -> anyhow::Result<(SchedulerEngine, JoinHandle<()>)> {
    let timezone = detect_timezone(config.timezone.as_deref());
    let task = Arc::new(ShellTask::from_config(&config.task)?);

    let (report_tx, report_rx) = mpsc::channel(REPORT_BUFFER);
    let router = ReportRouter::new(
        open_history(&config.database.path),
        WebhookNotifier::from_config(&config.notify),
    )
    .spawn(report_rx);

    let engine = SchedulerEngine::builder(config.schedule.clone(), config.retry.clone(), task)
        .timezone(timezone)
        .reports(report_tx)
        .build();
    Ok((engine, router))
}

/// Drop the engine (closing the report channel) and let the router finish.
async fn drain(engine: SchedulerEngine, router: JoinHandle<()>) {
    drop(engine);
    if tokio::time::timeout(DRAIN_TIMEOUT, router).await.is_err() {
        warn!("pending run reports not flushed before shutdown");
    }
}

/// History is optional: a broken database is logged and runs continue unrecorded.
fn open_history(path: &str) -> Option<RunHistory> {
    ensure_parent_dir(path);
    info!(path = %path, "opening run history");
    match RunHistory::open(path) {
        Ok(history) => Some(history),
        Err(e) => {
            warn!(path = %path, error = %e, "run history unavailable");
            None
        }
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
