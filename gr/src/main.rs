//! Ghostrun CLI entry point
//!
//! `plan` classifies and decomposes without touching a session; `run` is
//! a smoke harness that drives the full pipeline over stub capabilities;
//! real session and navigator backends are injected by the embedding
//! shell, not this binary.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use ghostrun::cli::{Cli, Command, OutputFormat};
use ghostrun::config::Config;
use ghostrun::domain::{Mode, Priority};
use ghostrun::events::StatusPayload;
use ghostrun::navigator::FixtureNavigator;
use ghostrun::orchestrator::{Orchestrator, SubmissionRequest};
use ghostrun::planning::{Decomposer, PlannerConfig, classify_intent};
use ghostrun::pool::StubSessionFactory;

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ghostrun")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("ghostrun.log")).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

fn print_plan(text: &str, mode: Mode, format: OutputFormat) -> Result<()> {
    let classification = classify_intent(text, mode);
    let plan = Decomposer::new(PlannerConfig::default()).decompose(text, &classification);

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "classification": classification,
                "plan": plan,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "{} (source {:?}, confidence {:.2}): {}",
                classification.intent, classification.source, classification.confidence, classification.reason
            );
            println!("implied steps: {}", plan.implied_steps);
            for subtask in &plan.subtasks {
                println!(
                    "  {} [{:?}] {}",
                    subtask.id, subtask.verification_type, subtask.intent
                );
            }
            if let Some(fallback) = &plan.fallback {
                println!("fallback:");
                for subtask in fallback {
                    println!("  {} [{:?}] {}", subtask.id, subtask.verification_type, subtask.intent);
                }
            }
        }
    }
    Ok(())
}

async fn run_stub_task(config: Config, text: &str, mode: Mode, foreground: bool) -> Result<()> {
    let navigator = Arc::new(FixtureNavigator::new());
    let orchestrator = Orchestrator::start(config, Arc::new(StubSessionFactory::new()), navigator).await;

    let mut rx = orchestrator.on_status();
    let priority = if foreground { Priority::Foreground } else { Priority::Background };
    let result = orchestrator.submit(SubmissionRequest::new(text).with_mode(mode).with_priority(priority));

    let Some(dispatch) = result.dispatch else {
        eyre::bail!("submission rejected: {}", result.error.unwrap_or_default());
    };
    println!("dispatch: {}", serde_json::to_string_pretty(&dispatch)?);

    if let Some(task_id) = dispatch.task_id.clone() {
        // Stream status events until the task's stream terminates
        while let Ok(event) = rx.recv().await {
            if event.task_id != task_id {
                continue;
            }
            println!("{}", serde_json::to_string(&event)?);
            if let StatusPayload::Scheduler(payload) = &event.payload
                && payload.event.is_terminal()
            {
                break;
            }
        }
        if let Some(task) = orchestrator.task(&task_id) {
            println!("task finished: {}", task.status);
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;

    let config = Config::load(cli.config.as_ref())?;
    info!("ghostrun starting");

    match cli.command {
        Command::Plan { text, mode, format } => print_plan(&text, mode.into(), format),
        Command::Run { text, mode, foreground } => run_stub_task(config, &text, mode.into(), foreground).await,
        Command::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}
