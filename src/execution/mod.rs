//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod report;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::StepExecutor;
pub use report::{ImageRecord, PipelineResult, RunInfo, StepCounts};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
