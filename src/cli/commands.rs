//! CLI command definitions

use crate::core::context::{
    RuntimeContext, BRANCH_NAME, BUILD_ID, COMMIT_SHA, PROJECT_ID, REPO_NAME, TAG_NAME,
};
use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;
use uuid::Uuid;

/// Bound used by `parallel-limited` when neither the CLI nor the config sets one
pub const DEFAULT_PARALLEL_LIMIT: usize = 4;

/// Trigger attributes that placeholders and conditions are evaluated against
#[derive(Debug, Args, Clone, Default)]
pub struct ContextArgs {
    /// Branch that triggered the build
    #[arg(long)]
    pub branch: Option<String>,

    /// Commit being built
    #[arg(long)]
    pub commit_sha: Option<String>,

    /// Tag that triggered the build
    #[arg(long)]
    pub tag: Option<String>,

    /// Repository name
    #[arg(long)]
    pub repo: Option<String>,

    /// Project id
    #[arg(long)]
    pub project_id: Option<String>,

    /// Substitution overrides (KEY=VALUE)
    #[arg(long = "substitution", short = 's', value_parser = parse_key_value)]
    pub substitutions: Vec<(String, String)>,
}

impl ContextArgs {
    /// Build the runtime context; `BUILD_ID` is always the given execution id
    pub fn runtime_context(&self, execution_id: Uuid) -> RuntimeContext {
        let mut context = RuntimeContext::new();
        let builtins = [
            (BRANCH_NAME, &self.branch),
            (COMMIT_SHA, &self.commit_sha),
            (TAG_NAME, &self.tag),
            (REPO_NAME, &self.repo),
            (PROJECT_ID, &self.project_id),
        ];
        for (key, value) in builtins {
            if let Some(value) = value {
                context.set_attribute(key, value.clone());
            }
        }
        context.set_attribute(BUILD_ID, execution_id.to_string());
        for (key, value) in &self.substitutions {
            context.set_attribute(key.clone(), value.clone());
        }
        context
    }
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Maximum number of steps running at once
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Directory steps run in
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Key names available for decrypting secrets (default: any)
    #[arg(long = "kms-key")]
    pub kms_keys: Vec<String>,

    /// Write the pipeline result as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print step output as it is produced
    #[arg(long)]
    pub stream: bool,

    /// Pass the whole parent environment to steps
    #[arg(long)]
    pub inherit_env: bool,
}

impl RunCommand {
    /// Resolve the concurrency bound: `--max-parallel`, then the config's
    /// `maxConcurrency`, then the strategy
    pub fn scheduling_strategy(&self, configured: Option<usize>) -> SchedulingStrategy {
        if let Some(max) = self.max_parallel {
            return SchedulingStrategy::LimitedParallel(max);
        }
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => configured
                .map(SchedulingStrategy::LimitedParallel)
                .unwrap_or(SchedulingStrategy::Parallel),
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(configured.unwrap_or(DEFAULT_PARALLEL_LIMIT))
            }
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the execution order and dependency edges
#[derive(Debug, Args, Clone)]
pub struct GraphCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    #[command(flatten)]
    pub context: ContextArgs,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
