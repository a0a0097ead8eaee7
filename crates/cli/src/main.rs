//! Survey pipeline CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `survey-pipeline.toml` and validate it.
//! 2. **Wire observability**: configure `tracing-subscriber` with a JSON layer
//!    and, when an endpoint is configured, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the HTTP inference provider, the shared
//!    circuit breaker and metrics sink, and the file-backed pipeline store,
//!    injected into the `Orchestrator`.
//! 4. **Run one operation** per invocation and map its outcome to an exit code.

mod commands;
mod config;
mod observability;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm::{OpenAiCompatibleProvider, ProviderConfig};
use nodes::{ExecutionContext, Orchestrator, StageRegistry};
use pipeline::{CircuitBreaker, MetricsCollector, ModelName, ProjectId};
use store::JsonFileStore;

use crate::config::{CliConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(name = "survey-pipeline", version, about = "Human-supervised survey research pipeline")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a project from a research question.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        question: String,
    },
    /// Generate the next stage (or the first, for a new project).
    Advance { project: ProjectId },
    /// Regenerate the current stage with reviewer feedback.
    Revise {
        project: ProjectId,
        #[arg(long)]
        feedback: String,
    },
    /// Approve the current stage.
    Approve { project: ProjectId },
    /// Discard every artifact and return to framing.
    Reset { project: ProjectId },
    /// Print a project's state.
    Status { project: ProjectId },
    /// List stored projects.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(commands::EXIT_CONFIGURATION)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = CliConfig::load(&cli.config)?;
    let _telemetry = observability::init(&config.telemetry)?;
    let orchestrator = build_orchestrator(&config)?;

    let outcome = match cli.command {
        Command::Create { name, question } => {
            let name = pipeline::ProjectName::new(name).context("project name must not be blank")?;
            commands::create(&orchestrator, name, question).await
        }
        Command::Advance { project } => commands::show(orchestrator.advance(project).await),
        Command::Revise { project, feedback } => {
            commands::show(orchestrator.revise(project, &feedback).await)
        }
        Command::Approve { project } => commands::show(orchestrator.approve(project).await),
        Command::Reset { project } => commands::show(orchestrator.reset(project).await),
        Command::Status { project } => commands::show(orchestrator.status(project).await),
        Command::List => commands::list(&orchestrator).await,
    };
    Ok(outcome)
}

fn build_orchestrator(config: &CliConfig) -> Result<Orchestrator> {
    let model = ModelName::new(config.inference.model.clone()).context("inference.model must not be blank")?;
    let provider = OpenAiCompatibleProvider::new(ProviderConfig {
        base_url: config.inference.base_url.clone(),
        model,
        api_key: config.api_key(),
        temperature: config.inference.temperature,
    })?;

    let context = ExecutionContext::new(Arc::new(provider))
        .with_breaker(Arc::new(CircuitBreaker::new("inference", config.breaker_config())))
        .with_metrics(Arc::new(MetricsCollector::new()))
        .with_retry(config.retry_policy())
        .with_attempt_timeout(config.attempt_timeout());

    Ok(Orchestrator::new(
        Arc::new(JsonFileStore::new(&config.store.directory)),
        StageRegistry::standard(context),
        config.orchestrator_config(),
    ))
}
