//! Execution scheduler - determines which steps to run next
//!
//! The scheduler is a synchronous state machine. It owns every step's
//! [`ExecutionResult`] and is driven by the engine: it hands out ready
//! steps, applies completions and propagates failures to dependents.

use crate::core::{
    ExecutionResult, PipelineGraph, RuntimeContext, StepCompletion, StepError, StepIndex,
    StepStatus,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    Sequential,

    /// Execute all ready steps in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Maximum number of steps in flight at once
    pub fn bound(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Scheduler for determining which steps to run
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,

    /// One result per step, indexed like the graph arena
    results: Vec<ExecutionResult>,

    /// Dependencies of each step not yet succeeded or skipped
    unmet: Vec<usize>,

    /// Pending steps with no unmet dependencies, by declaration index
    ready: BTreeSet<StepIndex>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy, graph: &PipelineGraph) -> Self {
        let results = graph
            .steps()
            .iter()
            .map(|step| ExecutionResult::pending(step.id.clone()))
            .collect();
        let unmet: Vec<usize> = (0..graph.len())
            .map(|index| graph.dependencies(index).len())
            .collect();
        let ready = unmet
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| index)
            .collect();

        Self {
            strategy,
            results,
            unmet,
            ready,
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Ready steps that fit under the concurrency bound, without removing them
    pub fn next_steps(&self, in_flight: usize) -> Vec<StepIndex> {
        let available = self.strategy.bound().saturating_sub(in_flight);
        self.ready.iter().copied().take(available).collect()
    }

    /// Evaluate a ready step's condition. A false condition skips the step
    /// and releases its dependents; returns whether the step may run.
    pub fn gate(&mut self, graph: &PipelineGraph, index: StepIndex, context: &RuntimeContext) -> bool {
        let Some(condition) = &graph.step(index).condition else {
            return true;
        };
        if condition.admit(context) {
            return true;
        }

        let reason = format!("condition not met: {}", condition.describe());
        info!("Skipping step {}: {}", graph.step(index).id, reason);
        self.ready.remove(&index);
        if self.results[index].skip(reason) {
            self.release_dependents(graph, index);
        }
        false
    }

    /// Move a ready step to running. Each step is dispatched at most once.
    pub fn mark_running(&mut self, index: StepIndex) -> bool {
        if !self.ready.remove(&index) {
            warn!("Step {} is not ready, refusing to dispatch", self.results[index].step_id);
            return false;
        }
        self.results[index].start()
    }

    /// Apply a worker's outcome and update the rest of the graph
    ///
    /// Returns the dependents this outcome failed, or `None` when the step
    /// was already terminal and the outcome was refused.
    pub fn complete(
        &mut self,
        graph: &PipelineGraph,
        index: StepIndex,
        completion: StepCompletion,
    ) -> Option<Vec<StepIndex>> {
        if !self.results[index].finish(completion) {
            return None;
        }

        let status = self.results[index].status;
        info!("Step {} finished: {}", graph.step(index).id, status.as_str());
        if status.satisfies_dependents() {
            self.release_dependents(graph, index);
            Some(Vec::new())
        } else {
            Some(self.propagate_failure(graph, index))
        }
    }

    fn release_dependents(&mut self, graph: &PipelineGraph, index: StepIndex) {
        for &dependent in graph.dependents(index) {
            self.unmet[dependent] = self.unmet[dependent].saturating_sub(1);
            if self.unmet[dependent] == 0 && self.results[dependent].status == StepStatus::Pending {
                debug!("Step {} is ready", graph.step(dependent).id);
                self.ready.insert(dependent);
            }
        }
    }

    /// Fail every pending transitive dependent of a step that did not succeed.
    /// Returns the indices that were failed.
    pub fn propagate_failure(&mut self, graph: &PipelineGraph, index: StepIndex) -> Vec<StepIndex> {
        let origin = graph.step(index).id.clone();
        let mut failed = Vec::new();

        for dependent in graph.transitive_dependents(index) {
            if self.results[dependent].status != StepStatus::Pending {
                continue;
            }
            self.ready.remove(&dependent);
            let completion = StepCompletion::failed(
                StepError::DependencyFailed {
                    dependency: origin.clone(),
                },
                None,
                String::new(),
            );
            if self.results[dependent].finish(completion) {
                info!(
                    "Step {} failed: dependency {} did not succeed",
                    graph.step(dependent).id,
                    origin
                );
                failed.push(dependent);
            }
        }
        failed
    }

    /// Cancel every step that has not started. Returns how many were cancelled.
    pub fn cancel_pending(&mut self, reason: &str) -> usize {
        self.ready.clear();
        let mut cancelled = 0;
        for result in self.results.iter_mut() {
            if result.status != StepStatus::Pending {
                continue;
            }
            let completion = StepCompletion::failed(
                StepError::Cancelled {
                    reason: reason.to_string(),
                },
                None,
                String::new(),
            );
            if result.finish(completion) {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("Cancelled {} pending step(s): {}", cancelled, reason);
        }
        cancelled
    }

    /// Force any step still non-terminal into `failed`
    ///
    /// Called once nothing is ready or in flight. A step still running at
    /// that point lost its worker; a step still pending depends on one.
    pub fn sweep(&mut self, graph: &PipelineGraph) -> usize {
        let mut swept = 0;
        for index in graph.execution_order().iter().copied() {
            let error = match self.results[index].status {
                StepStatus::Running => StepError::WorkerPanicked,
                StepStatus::Pending => {
                    let blocker = graph
                        .dependencies(index)
                        .iter()
                        .find(|dep| !self.results[**dep].status.satisfies_dependents())
                        .map(|dep| graph.step(*dep).id.clone())
                        .unwrap_or_default();
                    StepError::DependencyFailed { dependency: blocker }
                }
                _ => continue,
            };
            warn!("Sweeping step {} to failed: {}", graph.step(index).id, error);
            if self.results[index].finish(StepCompletion::failed(error, None, String::new())) {
                swept += 1;
            }
        }
        self.ready.clear();
        swept
    }

    pub fn result(&self, index: StepIndex) -> &ExecutionResult {
        &self.results[index]
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        self.results
    }

    /// Check if there are more steps to run
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.results.iter().all(|r| r.status.is_terminal())
    }
}
