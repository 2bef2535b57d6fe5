//! Test utility functions for stepgraph

#![allow(dead_code)]

use async_trait::async_trait;
use stepgraph::core::config::PipelineConfig;
use stepgraph::core::{ExecutionResult, Pipeline, RuntimeContext, Step, StepError, StepStatus};
use stepgraph::execution::{ExecutionEngine, PipelineResult, SchedulingStrategy};
use stepgraph::runner::{OutputCallback, OutputStream, RunLimits, RunOutcome, StepEnvironment, StepRunner};
use stepgraph::secrets::{KmsSecretResolver, LocalKeyring};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// What a mocked step does once its delay has passed
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Exit with this code after printing the lines
    Exit { code: i32, lines: Vec<String> },
    /// Print the value of an env var, then exit 0
    EchoEnv(String),
    /// Never exit on its own
    Hang,
    /// Fail to start
    LaunchFail(String),
}

#[derive(Debug, Clone)]
struct MockStep {
    delay: Duration,
    outcome: MockOutcome,
}

/// Observations shared between the runner and the test
#[derive(Debug, Default)]
pub struct MockState {
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    /// "start:<id>" / "end:<id>" in the order they happened
    log: Mutex<Vec<String>>,
}

impl MockState {
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Step ids in the order their commands started
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Step ids in the order their commands returned
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn was_started(&self, step_id: &str) -> bool {
        self.started().iter().any(|s| s == step_id)
    }
}

/// Runner with scripted per-step behaviour
///
/// Steps without a script exit 0 immediately. Deadlines and cancellation
/// are honoured the way the process runner honours them.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    steps: HashMap<String, MockStep>,
    state: Arc<MockState>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step_id: &str, delay_ms: u64, outcome: MockOutcome) -> Self {
        self.steps.insert(
            step_id.to_string(),
            MockStep {
                delay: Duration::from_millis(delay_ms),
                outcome,
            },
        );
        self
    }

    pub fn exit(self, step_id: &str, code: i32) -> Self {
        self.step(step_id, 0, MockOutcome::Exit { code, lines: vec![] })
    }

    pub fn sleep(self, step_id: &str, delay_ms: u64) -> Self {
        self.step(step_id, delay_ms, MockOutcome::Exit { code: 0, lines: vec![] })
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn run(
        &self,
        step: &Step,
        env: &StepEnvironment,
        limits: RunLimits,
        callback: &dyn OutputCallback,
    ) -> RunOutcome {
        let script = self.steps.get(&step.id).cloned().unwrap_or(MockStep {
            delay: Duration::ZERO,
            outcome: MockOutcome::Exit {
                code: 0,
                lines: vec![],
            },
        });

        if let MockOutcome::LaunchFail(message) = &script.outcome {
            return RunOutcome::LaunchFailed {
                message: message.clone(),
            };
        }

        self.state.started.lock().unwrap().push(step.id.clone());
        self.state.log.lock().unwrap().push(format!("start:{}", step.id));
        let now = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_running.fetch_max(now, Ordering::SeqCst);

        let mut output = format!("starting {}\n", step.id);
        callback.on_line(&step.id, OutputStream::Stdout, &format!("starting {}", step.id));

        let hang = matches!(script.outcome, MockOutcome::Hang);
        let finished = tokio::select! {
            _ = tokio::time::sleep(script.delay), if !hang => true,
            _ = tokio::time::sleep_until(limits.deadline) => false,
            _ = limits.cancel.cancelled() => false,
        };

        let outcome = if !finished {
            if limits.cancel.is_cancelled() {
                RunOutcome::Cancelled { output }
            } else {
                RunOutcome::TimedOut { output }
            }
        } else {
            match script.outcome {
                MockOutcome::Exit { code, lines } => {
                    for line in lines {
                        callback.on_line(&step.id, OutputStream::Stdout, &line);
                        output.push_str(&line);
                        output.push('\n');
                    }
                    RunOutcome::Exited { code, output }
                }
                MockOutcome::EchoEnv(name) => {
                    let line = format!("{}={}", name, env.get(&name).unwrap_or(""));
                    callback.on_line(&step.id, OutputStream::Stdout, &line);
                    output.push_str(&line);
                    output.push('\n');
                    RunOutcome::Exited { code: 0, output }
                }
                MockOutcome::Hang | MockOutcome::LaunchFail(_) => unreachable!(),
            }
        };

        self.state.running.fetch_sub(1, Ordering::SeqCst);
        self.state.finished.lock().unwrap().push(step.id.clone());
        self.state.log.lock().unwrap().push(format!("end:{}", step.id));
        outcome
    }
}

/// Build a pipeline from YAML with the given trigger context
pub fn pipeline_from_yaml(yaml: &str, context: &RuntimeContext) -> Arc<Pipeline> {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    Arc::new(config.to_pipeline(context).unwrap())
}

/// Run a pipeline with a mock runner and a permissive keyring
pub async fn run_with_mock(
    yaml: &str,
    runner: MockRunner,
    strategy: SchedulingStrategy,
) -> PipelineResult {
    run_with_context(yaml, runner, strategy, &RuntimeContext::new()).await
}

pub async fn run_with_context(
    yaml: &str,
    runner: MockRunner,
    strategy: SchedulingStrategy,
    context: &RuntimeContext,
) -> PipelineResult {
    let pipeline = pipeline_from_yaml(yaml, context);
    let engine = ExecutionEngine::new(
        runner,
        KmsSecretResolver::new(LocalKeyring::permissive()),
        strategy,
    );
    engine.execute(pipeline, Uuid::new_v4()).await
}

pub fn step<'a>(result: &'a PipelineResult, step_id: &str) -> &'a ExecutionResult {
    result
        .step(step_id)
        .unwrap_or_else(|| panic!("Step '{}' not found in result", step_id))
}

/// Assert a step ended in the given status
pub fn assert_status(result: &PipelineResult, step_id: &str, expected: StepStatus) {
    let actual = step(result, step_id);
    assert_eq!(
        actual.status, expected,
        "Step '{}' should be {:?}, but was {:?} ({:?})",
        step_id, expected, actual.status, actual.error
    );
}

/// Assert a step was failed because `dependency` did not succeed
pub fn assert_blocked_by(result: &PipelineResult, step_id: &str, dependency: &str) {
    assert_status(result, step_id, StepStatus::Failed);
    assert_eq!(
        step(result, step_id).error,
        Some(StepError::DependencyFailed {
            dependency: dependency.to_string()
        }),
        "Step '{}' should be blocked by '{}'",
        step_id,
        dependency
    );
}

/// Assert `before` finished before `after` started
pub fn assert_ran_before(state: &MockState, before: &str, after: &str) {
    let log = state.log();
    let end = log
        .iter()
        .position(|e| *e == format!("end:{}", before))
        .unwrap_or_else(|| panic!("'{}' never finished: {:?}", before, log));
    let start = log
        .iter()
        .position(|e| *e == format!("start:{}", after))
        .unwrap_or_else(|| panic!("'{}' never started: {:?}", after, log));
    assert!(
        end < start,
        "'{}' should finish before '{}' starts: {:?}",
        before,
        after,
        log
    );
}
