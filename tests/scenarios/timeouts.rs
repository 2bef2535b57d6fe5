//! Test: Timeouts and cancellation

use crate::helpers::*;
use std::time::Duration;
use stepgraph::core::{RuntimeContext, StepError, StepStatus, Termination};
use stepgraph::execution::report::{EXIT_CANCELLED, EXIT_TIMEOUT};
use stepgraph::execution::{ExecutionEngine, SchedulingStrategy};
use stepgraph::secrets::{KmsSecretResolver, LocalKeyring};
use uuid::Uuid;

#[tokio::test]
async fn test_step_timeout() {
    let yaml = r#"
steps:
  - id: stuck
    name: sh
    timeout: 50ms
  - id: after-stuck
    name: sh
    waitFor: [stuck]
  - id: other
    name: sh
"#;
    let runner = MockRunner::new()
        .step("stuck", 0, MockOutcome::Hang)
        .sleep("other", 10);
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.exit_code, EXIT_TIMEOUT);
    assert_status(&result, "stuck", StepStatus::TimedOut);
    assert_eq!(
        step(&result, "stuck").error,
        Some(StepError::Timeout { after_ms: 50 })
    );
    // Output produced before the deadline is kept
    assert!(step(&result, "stuck").output.contains("starting stuck"));
    assert_blocked_by(&result, "after-stuck", "stuck");
    assert_status(&result, "other", StepStatus::Succeeded);
}

#[tokio::test]
async fn test_pipeline_timeout() {
    let yaml = r#"
timeout: 100ms
steps:
  - id: quick
    name: sh
  - id: forever
    name: sh
    waitFor: [quick]
  - id: never
    name: sh
    waitFor: [forever]
"#;
    let runner = MockRunner::new().step("forever", 0, MockOutcome::Hang);
    let state = runner.state();
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.termination, Termination::TimedOut);
    assert_eq!(result.exit_code, EXIT_TIMEOUT);
    assert_status(&result, "quick", StepStatus::Succeeded);
    assert_status(&result, "forever", StepStatus::TimedOut);
    assert_status(&result, "never", StepStatus::Cancelled);
    assert!(!state.was_started("never"));
    assert!(result.duration() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_external_cancellation() {
    let yaml = r#"
steps:
  - id: a
    name: sh
  - id: b
    name: sh
  - id: c
    name: sh
    waitFor: [a, b]
"#;
    let pipeline = pipeline_from_yaml(yaml, &RuntimeContext::new());
    let runner = MockRunner::new()
        .step("a", 0, MockOutcome::Hang)
        .step("b", 0, MockOutcome::Hang);
    let engine = ExecutionEngine::new(
        runner,
        KmsSecretResolver::new(LocalKeyring::permissive()),
        SchedulingStrategy::Parallel,
    );

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    let result = engine.execute(pipeline, Uuid::new_v4()).await;

    assert_eq!(result.termination, Termination::Cancelled);
    assert_eq!(result.exit_code, EXIT_CANCELLED);
    for id in ["a", "b", "c"] {
        assert_status(&result, id, StepStatus::Cancelled);
    }
}
