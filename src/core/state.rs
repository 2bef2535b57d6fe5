//! Execution state models

use crate::core::error::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies or a free worker
    Pending,
    /// Condition evaluated false; satisfies dependents
    Skipped,
    /// Command is running
    Running,
    /// Command exited with status 0
    Succeeded,
    /// Command failed, or was never run because of a secret or dependency failure
    Failed,
    /// Step deadline expired and the command was terminated
    TimedOut,
    /// Run was cancelled before or while the step ran
    Cancelled,
}

impl StepStatus {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Whether dependents may run after this status
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }

    /// Terminal states that block dependents
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::TimedOut | StepStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Skipped => "skipped",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::TimedOut => "timed_out",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

/// Overall pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

/// How a pipeline run came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every step reached a terminal state on its own
    Completed,
    /// The pipeline-wide deadline fired
    TimedOut,
    /// The run was cancelled from outside (e.g. Ctrl-C)
    Cancelled,
}

/// Per-step record of what happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_id: String,
    pub status: StepStatus,

    /// Exit code of the command, when it ran to exit
    pub exit_code: Option<i32>,

    /// Classification when the step did not succeed
    pub error: Option<StepError>,

    /// Combined stdout/stderr, secret values redacted
    pub output: String,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Images this step produced
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Why the step was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// Terminal outcome handed to [`ExecutionResult::finish`]
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub error: Option<StepError>,
    pub output: String,
    pub artifacts: Vec<String>,
}

impl StepCompletion {
    pub fn succeeded(output: String, artifacts: Vec<String>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            exit_code: Some(0),
            error: None,
            output,
            artifacts,
        }
    }

    pub fn failed(error: StepError, exit_code: Option<i32>, output: String) -> Self {
        let status = match error {
            StepError::Timeout { .. } => StepStatus::TimedOut,
            StepError::Cancelled { .. } => StepStatus::Cancelled,
            _ => StepStatus::Failed,
        };
        Self {
            status,
            exit_code,
            error: Some(error),
            output,
            artifacts: Vec::new(),
        }
    }
}

impl ExecutionResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            exit_code: None,
            error: None,
            output: String::new(),
            started_at: None,
            finished_at: None,
            artifacts: Vec::new(),
            skip_reason: None,
        }
    }

    /// Move a pending step to running. Refused for any other state.
    pub fn start(&mut self) -> bool {
        if self.status != StepStatus::Pending {
            warn!(
                "Refusing to start step {} in state {}",
                self.step_id,
                self.status.as_str()
            );
            return false;
        }
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Move a pending step straight to skipped
    pub fn skip(&mut self, reason: impl Into<String>) -> bool {
        if self.status != StepStatus::Pending {
            warn!(
                "Refusing to skip step {} in state {}",
                self.step_id,
                self.status.as_str()
            );
            return false;
        }
        let now = Utc::now();
        self.status = StepStatus::Skipped;
        self.skip_reason = Some(reason.into());
        self.finished_at = Some(now);
        true
    }

    /// Apply a terminal outcome. Terminal states never change again.
    pub fn finish(&mut self, completion: StepCompletion) -> bool {
        if self.status.is_terminal() {
            warn!(
                "Ignoring transition of step {} from terminal state {} to {}",
                self.step_id,
                self.status.as_str(),
                completion.status.as_str()
            );
            return false;
        }
        debug_assert!(completion.status.is_terminal());
        self.status = completion.status;
        self.exit_code = completion.exit_code;
        self.error = completion.error;
        self.output = completion.output;
        self.artifacts = completion.artifacts;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Wall-clock duration, if the step ran
    pub fn duration(&self) -> Option<std::time::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.signed_duration_since(start).to_std().ok(),
            _ => None,
        }
    }
}
