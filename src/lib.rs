//! stepgraph - run declarative build pipelines as dependency graphs

pub mod cli;
pub mod core;
pub mod execution;
pub mod runner;
pub mod secrets;

// Re-export commonly used types
pub use crate::core::{ConfigError, ExecutionResult, Pipeline, PipelineGraph, RuntimeContext, Step, StepStatus};
pub use execution::{ExecutionEngine, ExecutionEvent, PipelineResult, SchedulingStrategy};
pub use runner::{ProcessRunner, StepRunner};
pub use secrets::{KmsSecretResolver, LocalKeyring, SecretResolver};
