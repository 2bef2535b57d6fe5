//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{Pipeline, PipelineStatus, StepCompletion, StepError, StepIndex, StepStatus, Termination},
    execution::{
        report::{PipelineResult, RunInfo},
        ExecutionScheduler, SchedulingStrategy, StepExecutor,
    },
    runner::{NoopCallback, OutputCallback, StepRunner},
    secrets::SecretResolver,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: String,
    },
    StepSkipped {
        step_id: String,
        reason: String,
    },
    StepFinished {
        step_id: String,
        status: StepStatus,
        error: Option<StepError>,
        duration: Option<Duration>,
    },
    PipelineTimedOut {
        timeout: Duration,
    },
    PipelineCancelled,
    PipelineCompleted {
        execution_id: Uuid,
        status: PipelineStatus,
        exit_code: i32,
    },
}

/// Stand-in deadline for timeouts too large to represent as an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
pub struct ExecutionEngine<R, S> {
    executor: Arc<StepExecutor<R, S>>,
    strategy: SchedulingStrategy,
    event_handlers: Vec<EventHandler>,
    output: Arc<dyn OutputCallback>,
    cancel: CancellationToken,
}

impl<R, S> ExecutionEngine<R, S>
where
    R: StepRunner + 'static,
    S: SecretResolver + 'static,
{
    pub fn new(runner: R, resolver: S, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(StepExecutor::new(runner, resolver)),
            strategy,
            event_handlers: Vec::new(),
            output: Arc::new(NoopCallback),
            cancel: CancellationToken::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    /// Receive step output lines as they are produced
    pub fn with_output_callback(mut self, callback: Arc<dyn OutputCallback>) -> Self {
        self.output = callback;
        self
    }

    /// Use an externally owned token; cancelling it cancels the run
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline
    pub async fn execute(&self, pipeline: Arc<Pipeline>, execution_id: Uuid) -> PipelineResult {
        let started_at = Utc::now();
        let graph = &pipeline.graph;

        info!(
            "Starting pipeline execution: {} ({}, {} steps, {:?})",
            pipeline.name,
            execution_id,
            graph.len(),
            self.strategy
        );
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: graph.len(),
        });

        let mut scheduler = ExecutionScheduler::new(self.strategy, graph);
        let now = Instant::now();
        let pipeline_deadline = now
            .checked_add(pipeline.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let deadline = tokio::time::sleep_until(pipeline_deadline);
        tokio::pin!(deadline);

        // Child token: a pipeline timeout stops workers without cancelling the caller's token
        let workers_cancel = self.cancel.child_token();
        let mut workers = Workers::default();
        let mut termination = Termination::Completed;

        loop {
            if termination == Termination::Completed && self.cancel.is_cancelled() {
                termination = self.cancel_run(&mut scheduler, &pipeline);
            }
            if termination == Termination::Completed {
                self.dispatch(&mut scheduler, &pipeline, &mut workers, pipeline_deadline, &workers_cancel);
            }
            if workers.set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if termination == Termination::Completed => {
                    termination = self.cancel_run(&mut scheduler, &pipeline);
                }
                _ = &mut deadline, if termination == Termination::Completed => {
                    warn!("Pipeline {} exceeded its {:?} timeout", pipeline.name, pipeline.timeout);
                    termination = Termination::TimedOut;
                    scheduler.cancel_pending("pipeline timed out");
                    workers_cancel.cancel();
                    self.emit_event(ExecutionEvent::PipelineTimedOut { timeout: pipeline.timeout });
                }
                joined = workers.set.join_next_with_id() => match joined {
                    Some(Ok((id, mut completion))) => {
                        let Some(index) = workers.steps.remove(&id) else {
                            continue;
                        };
                        // Runners stopped by the pipeline deadline report as timed out
                        if termination == Termination::TimedOut && completion.status == StepStatus::Cancelled {
                            completion = StepCompletion::failed(
                                StepError::Timeout { after_ms: pipeline.timeout.as_millis() as u64 },
                                completion.exit_code,
                                completion.output,
                            );
                        }
                        self.complete(&mut scheduler, &pipeline, index, completion);
                    }
                    Some(Err(e)) => {
                        let Some(index) = workers.steps.remove(&e.id()) else {
                            error!("Unknown step worker ended abnormally: {}", e);
                            continue;
                        };
                        error!("Worker for step {} ended abnormally: {}", graph.step(index).id, e);
                        let completion = StepCompletion::failed(StepError::WorkerPanicked, None, String::new());
                        self.complete(&mut scheduler, &pipeline, index, completion);
                    }
                    None => break,
                },
            }
        }

        if scheduler.sweep(graph) > 0 {
            warn!("Some steps did not reach a terminal state and were marked failed");
        }

        let result = PipelineResult::finalize(
            RunInfo {
                execution_id,
                pipeline_name: pipeline.name.clone(),
                started_at,
            },
            graph,
            scheduler.into_results(),
            termination,
            &pipeline.images,
        );

        info!(
            "Pipeline {} finished: {:?} (exit code {})",
            pipeline.name, result.status, result.exit_code
        );
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status: result.status,
            exit_code: result.exit_code,
        });
        result
    }

    /// External cancellation: pending steps are cancelled, in-flight runners
    /// see the same token through their child token
    fn cancel_run(&self, scheduler: &mut ExecutionScheduler, pipeline: &Pipeline) -> Termination {
        warn!("Pipeline {} cancelled", pipeline.name);
        scheduler.cancel_pending("pipeline cancelled");
        self.emit_event(ExecutionEvent::PipelineCancelled);
        Termination::Cancelled
    }

    /// Start every ready step that fits under the concurrency bound
    fn dispatch(
        &self,
        scheduler: &mut ExecutionScheduler,
        pipeline: &Arc<Pipeline>,
        workers: &mut Workers,
        pipeline_deadline: Instant,
        cancel: &CancellationToken,
    ) {
        loop {
            let batch = scheduler.next_steps(workers.set.len());
            if batch.is_empty() {
                return;
            }

            for index in batch {
                if !scheduler.gate(&pipeline.graph, index, &pipeline.context) {
                    let result = scheduler.result(index);
                    self.emit_event(ExecutionEvent::StepSkipped {
                        step_id: result.step_id.clone(),
                        reason: result.skip_reason.clone().unwrap_or_default(),
                    });
                    continue;
                }
                if !scheduler.mark_running(index) {
                    continue;
                }

                let step_id = pipeline.graph.step(index).id.clone();
                info!("Dispatching step: {}", step_id);
                self.emit_event(ExecutionEvent::StepStarted { step_id });

                let executor = Arc::clone(&self.executor);
                let pipeline = Arc::clone(pipeline);
                let output = Arc::clone(&self.output);
                let cancel = cancel.clone();
                let handle = workers.set.spawn(async move {
                    let step = pipeline.graph.step(index);
                    let limits = StepExecutor::<R, S>::limits(step, pipeline_deadline, cancel);
                    executor
                        .execute(step, &pipeline, limits, output.as_ref())
                        .await
                });
                workers.steps.insert(handle.id(), index);
            }
        }
    }

    fn complete(
        &self,
        scheduler: &mut ExecutionScheduler,
        pipeline: &Pipeline,
        index: StepIndex,
        completion: StepCompletion,
    ) {
        let Some(blocked) = scheduler.complete(&pipeline.graph, index, completion) else {
            return;
        };

        let result = scheduler.result(index);
        self.emit_event(ExecutionEvent::StepFinished {
            step_id: result.step_id.clone(),
            status: result.status,
            error: result.error.clone(),
            duration: result.duration(),
        });

        for dependent in blocked {
            let dependent = scheduler.result(dependent);
            self.emit_event(ExecutionEvent::StepFinished {
                step_id: dependent.step_id.clone(),
                status: dependent.status,
                error: dependent.error.clone(),
                duration: None,
            });
        }
    }
}

/// In-flight step workers, keyed by task so a panicked worker can still be
/// traced back to its step
#[derive(Default)]
struct Workers {
    set: JoinSet<StepCompletion>,
    steps: HashMap<task::Id, StepIndex>,
}
