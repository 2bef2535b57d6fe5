//! Result aggregation - reduces per-step results to a pipeline verdict

use crate::core::{
    ExecutionResult, PipelineGraph, PipelineStatus, StepError, StepStatus, Termination,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Configuration error (`EX_CONFIG` from sysexits.h)
pub const EXIT_CONFIG: i32 = 78;
pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_CANCELLED: i32 = 130;

/// Identity of one pipeline run
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub started_at: DateTime<Utc>,
}

/// An expected image and the step that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image: String,

    /// `None` when no succeeded step named the image
    pub produced_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

/// Aggregated outcome of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub status: PipelineStatus,
    pub exit_code: i32,
    pub termination: Termination,

    /// Step results in declaration order
    pub steps: Vec<ExecutionResult>,

    pub images: Vec<ImageRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: StepCounts,
}

impl PipelineResult {
    /// Reduce final step results to the pipeline's verdict
    ///
    /// The pipeline succeeds iff every step that was not skipped succeeded.
    /// Otherwise the exit code comes from the termination cause, or from the
    /// first step in topological order that failed on its own account.
    pub fn finalize(
        run: RunInfo,
        graph: &PipelineGraph,
        steps: Vec<ExecutionResult>,
        termination: Termination,
        images: &[String],
    ) -> Self {
        let succeeded = steps
            .iter()
            .all(|r| matches!(r.status, StepStatus::Succeeded | StepStatus::Skipped));
        let status = if succeeded {
            PipelineStatus::Succeeded
        } else {
            PipelineStatus::Failed
        };

        let exit_code = match (status, termination) {
            (PipelineStatus::Succeeded, _) => EXIT_SUCCESS,
            (_, Termination::TimedOut) => EXIT_TIMEOUT,
            (_, Termination::Cancelled) => EXIT_CANCELLED,
            (_, Termination::Completed) => originating_exit_code(graph, &steps),
        };

        let images = images
            .iter()
            .map(|image| ImageRecord {
                image: image.clone(),
                produced_by: graph
                    .execution_order()
                    .iter()
                    .map(|i| &steps[*i])
                    .find(|r| r.status == StepStatus::Succeeded && r.artifacts.contains(image))
                    .map(|r| r.step_id.clone()),
            })
            .collect();

        let finished_at = steps
            .iter()
            .filter_map(|r| r.finished_at)
            .max()
            .unwrap_or(run.started_at)
            .max(run.started_at);

        Self {
            execution_id: run.execution_id,
            pipeline_name: run.pipeline_name,
            status,
            exit_code,
            termination,
            counts: count(&steps),
            steps,
            images,
            started_at: run.started_at,
            finished_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    pub fn step(&self, id: &str) -> Option<&ExecutionResult> {
        self.steps.iter().find(|r| r.step_id == id)
    }

    pub fn duration(&self) -> std::time::Duration {
        self.finished_at
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn originating_exit_code(graph: &PipelineGraph, steps: &[ExecutionResult]) -> i32 {
    graph
        .execution_order()
        .iter()
        .filter_map(|i| steps[*i].error.as_ref())
        .find_map(|error| match error {
            StepError::DependencyFailed { .. } => None,
            StepError::NonZeroExit { code } => Some(*code),
            StepError::Timeout { .. } => Some(EXIT_TIMEOUT),
            StepError::Cancelled { .. } => Some(EXIT_CANCELLED),
            StepError::Secret { .. } | StepError::Launch { .. } | StepError::WorkerPanicked => {
                Some(EXIT_FAILURE)
            }
        })
        .unwrap_or(EXIT_FAILURE)
}

fn count(steps: &[ExecutionResult]) -> StepCounts {
    let mut counts = StepCounts {
        total: steps.len(),
        ..Default::default()
    };
    for result in steps {
        match result.status {
            StepStatus::Succeeded => counts.succeeded += 1,
            StepStatus::Failed => counts.failed += 1,
            StepStatus::TimedOut => counts.timed_out += 1,
            StepStatus::Cancelled => counts.cancelled += 1,
            StepStatus::Skipped => counts.skipped += 1,
            StepStatus::Pending | StepStatus::Running => {}
        }
    }
    counts
}
