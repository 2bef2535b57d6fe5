use anyhow::{Context, Result};
use stepgraph::cli::commands::{ContextArgs, GraphCommand, RunCommand, ValidateCommand};
use stepgraph::cli::output::*;
use stepgraph::cli::terminal_output::TerminalOutputCallback;
use stepgraph::cli::{Cli, Command};
use stepgraph::core::{config::PipelineConfig, Pipeline, StepStatus};
use stepgraph::execution::report::{EXIT_CONFIG, EXIT_SUCCESS};
use stepgraph::execution::{ExecutionEngine, ExecutionEvent};
use stepgraph::runner::{OutputCallback, ProcessRunner, ProcessRunnerConfig};
use stepgraph::secrets::{KmsSecretResolver, LocalKeyring};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let exit_code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Graph(cmd) => show_graph(cmd)?,
    };

    if exit_code != EXIT_SUCCESS {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Load, substitute and validate a pipeline file
fn load_pipeline(file: &Path, context: &ContextArgs, execution_id: Uuid) -> Result<Pipeline> {
    let config = PipelineConfig::from_file(file)?;
    let pipeline = config.to_pipeline(&context.runtime_context(execution_id))?;
    Ok(pipeline)
}

fn report_config_error(error: &anyhow::Error) -> i32 {
    println!("{} Invalid pipeline configuration:", CROSS);
    println!("  {}", style(format!("{:#}", error)).red());
    EXIT_CONFIG
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let execution_id = Uuid::new_v4();
    let pipeline = match load_pipeline(&cmd.file, &cmd.context, execution_id) {
        Ok(pipeline) => pipeline,
        Err(e) => return Ok(report_config_error(&e)),
    };

    println!(
        "{} Loaded pipeline: {} ({} steps)",
        INFO,
        style(&pipeline.name).bold(),
        pipeline.graph.len()
    );
    if let Some(machine_type) = &pipeline.options.machine_type {
        warn!("machineType {} is ignored when running locally", machine_type);
    }

    let strategy = cmd.scheduling_strategy(pipeline.options.max_concurrency);
    let keyring = if cmd.kms_keys.is_empty() {
        LocalKeyring::permissive()
    } else {
        LocalKeyring::with_keys(cmd.kms_keys.iter().cloned())
    };
    let runner = ProcessRunner::new(ProcessRunnerConfig {
        workspace: cmd.workspace.clone(),
        inherit_env: cmd.inherit_env,
    });

    let progress = create_progress_bar(pipeline.graph.len());
    let bar = progress.clone();
    let mut engine = ExecutionEngine::new(runner, KmsSecretResolver::new(keyring), strategy)
        .with_event_handler(move |event| {
            match &event {
                ExecutionEvent::StepStarted { step_id } => bar.set_message(step_id.clone()),
                ExecutionEvent::StepSkipped { .. } => bar.inc(1),
                ExecutionEvent::StepFinished { status, .. } if *status != StepStatus::Running => {
                    bar.inc(1)
                }
                ExecutionEvent::PipelineTimedOut { .. } | ExecutionEvent::PipelineCancelled => {
                    bar.set_message("stopping")
                }
                _ => {}
            }
            bar.println(format_execution_event(&event));
        });

    if cmd.stream {
        let width = pipeline.graph.steps().iter().map(|s| s.id.len()).max().unwrap_or(0);
        let output: Arc<dyn OutputCallback> =
            Arc::new(TerminalOutputCallback::new(width, Some(progress.clone())));
        engine = engine.with_output_callback(output);
    }

    // Ctrl-C cancels the run
    let cancel = engine.cancellation_token();
    let signal_watch = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = engine.execute(Arc::new(pipeline), execution_id).await;
    signal_watch.abort();
    progress.finish_and_clear();

    println!();
    println!("{}", format_summary(&result));

    if let Some(path) = &cmd.report {
        let json = result.to_json().context("Failed to serialize pipeline result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("{} Report written to {}", INFO, style(path.display()).dim());
    }

    if !result.is_success() {
        if let Some(failed) = result.steps.iter().find(|s| {
            s.status.is_failure() && !s.output.is_empty()
        }) {
            error!("Step {} failed", failed.step_id);
            println!(
                "\n{} Output of {}:\n{}",
                WARN,
                style(&failed.step_id).bold(),
                format_output(&failed.output, 20)
            );
        }
    }

    Ok(result.exit_code)
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating pipeline...", INFO);

    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => return Ok(report_config_error(&e)),
    };
    // No run happens, but $BUILD_ID still has to resolve
    let pipeline = match config.to_pipeline(&cmd.context.runtime_context(Uuid::new_v4())) {
        Ok(pipeline) => pipeline,
        Err(e) => return Ok(report_config_error(&anyhow::Error::from(e))),
    };

    println!("{} Pipeline configuration is valid!", CHECK);
    println!("  Name: {}", style(&pipeline.name).bold());
    println!("  Steps: {}", style(pipeline.graph.len()).cyan());
    println!("  Images: {}", style(pipeline.images.len()).cyan());
    println!("  Secrets: {}", style(pipeline.secrets.len()).cyan());
    println!("  Order: {}", pipeline.execution_order().join(" -> "));

    if cmd.json {
        let json = serde_json::to_string_pretty(&config)?;
        println!("\n{}", json);
    }
    Ok(EXIT_SUCCESS)
}

fn show_graph(cmd: &GraphCommand) -> Result<i32> {
    match load_pipeline(&cmd.file, &cmd.context, Uuid::new_v4()) {
        Ok(pipeline) => {
            println!("{}", format_graph(&pipeline));
            Ok(EXIT_SUCCESS)
        }
        Err(e) => Ok(report_config_error(&e)),
    }
}
